//! Control channel — the boundary through which external actors steer the engine.
//!
//! Two scalars can be changed at any time: the target concurrency and the
//! per-request workload. Both live in `tokio::sync::watch` cells, so there is
//! never a queue of pending updates: the latest write wins and every reader
//! sees it on its next look. Target changes are picked up by the next
//! reconciliation tick, workload changes by the next request each user issues.
//!
//! The same handle carries the shutdown signal for the whole engine.
use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::watch::{Receiver, Sender, channel};

use crate::error::ControlError;

/// Unit of simulated work requested per call, expressed as a duration the
/// endpoint should spend on it. Always strictly positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Workload(Duration);

impl Workload {
    pub fn new(duration: Duration) -> Result<Self, ControlError> {
        if duration.is_zero() {
            return Err(ControlError::NonPositiveWorkload);
        }
        Ok(Self(duration))
    }

    pub fn from_millis(ms: u64) -> Result<Self, ControlError> {
        Self::new(Duration::from_millis(ms))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Whole milliseconds, rounded up so sub-millisecond workloads never become zero.
    pub fn as_millis(&self) -> u64 {
        let ms = u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX);
        if Duration::from_millis(ms) < self.0 {
            ms.saturating_add(1)
        } else {
            ms
        }
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self(Duration::from_millis(10))
    }
}

struct ControlInner {
    target: Sender<usize>,
    workload: Sender<Workload>,
    shutdown: Sender<bool>,
}

/// Cheap, clonable write side of the control channel.
#[derive(Clone)]
pub struct ControlHandle {
    inner: Arc<ControlInner>,
}

/// Read side handed to the engine's tasks.
#[derive(Clone)]
pub struct ControlReader {
    pub target: Receiver<usize>,
    pub workload: Receiver<Workload>,
    pub shutdown: Receiver<bool>,
}

impl ControlHandle {
    pub fn new(target: usize, workload: Workload) -> (Self, ControlReader) {
        let (target_tx, target_rx) = channel(target);
        let (workload_tx, workload_rx) = channel(workload);
        let (shutdown_tx, shutdown_rx) = channel(false);
        (
            Self {
                inner: Arc::new(ControlInner {
                    target: target_tx,
                    workload: workload_tx,
                    shutdown: shutdown_tx,
                }),
            },
            ControlReader {
                target: target_rx,
                workload: workload_rx,
                shutdown: shutdown_rx,
            },
        )
    }

    /// Set the number of virtual users the pool should converge to.
    pub fn set_target(&self, users: usize) -> Result<(), ControlError> {
        self.ensure_open()?;
        let previous = self.inner.target.send_replace(users);
        if previous != users {
            tracing::debug!("Target concurrency {previous} -> {users}");
        }
        Ok(())
    }

    /// Set the workload every subsequently issued request carries.
    pub fn set_workload(&self, workload: Workload) -> Result<(), ControlError> {
        self.ensure_open()?;
        let previous = self.inner.workload.send_replace(workload);
        if previous != workload {
            tracing::debug!("Workload {:?} -> {:?}", previous.duration(), workload.duration());
        }
        Ok(())
    }

    pub fn target(&self) -> usize {
        *self.inner.target.borrow()
    }

    pub fn workload(&self) -> Workload {
        *self.inner.workload.borrow()
    }

    /// Ask every engine task to stop. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    fn ensure_open(&self) -> Result<(), ControlError> {
        if self.is_shutdown() {
            return Err(ControlError::Closed);
        }
        Ok(())
    }
}

impl ControlReader {
    /// Resolves once shutdown has been requested.
    pub async fn shutdown_requested(&mut self) {
        // A dropped handle also ends the run.
        let _ = self.shutdown.wait_for(|b| *b).await;
    }
}
