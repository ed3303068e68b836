//! Stats aggregator — counters shared by every virtual user.
//!
//! `completed` and `failed` are interval counters: [`Stats::flush`] swaps them
//! back to zero. `in_flight` is a live gauge maintained only by request
//! start/finish events and is never reset by a flush.
//!
//! All counters are plain atomics, so any number of users can update them
//! concurrently without losing increments. Latencies go into a small
//! mutex-guarded [`LatencyAggregate`] that the sampler drains once per tick.
use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{Event, error::IssueError};
use throng_macros::{aggregate, event};

/// Counters observed at one flush.
#[event]
#[derive(Copy, Default, Eq)]
pub struct IntervalSnapshot {
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
pub struct IntervalCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
}

impl IntervalCounters {
    pub fn request_started(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a resolved request. The gauge saturates at zero so an unmatched
    /// finish can never wrap it around.
    pub fn request_finished(&self, success: bool) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if success {
            self.completed.fetch_add(1, Ordering::AcqRel);
        } else {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Snapshot the counters and reset the interval ones.
    pub fn flush(&self) -> IntervalSnapshot {
        IntervalSnapshot {
            in_flight: self.in_flight.load(Ordering::Acquire),
            completed: self.completed.swap(0, Ordering::AcqRel),
            failed: self.failed.swap(0, Ordering::AcqRel),
        }
    }
}

/// Raw latency observations for one sampling interval.
///
/// Like any aggregate it stores only what is needed to derive statistics later
/// (sum, count, extremes); the average is computed by the sampler.
#[aggregate]
pub struct LatencyAggregate {
    pub total: Duration,
    pub count: u64,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
}

impl LatencyAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, latency: Duration) {
        self.total += latency;
        self.count += 1;
        self.min = Some(self.min.map_or(latency, |m| m.min(latency)));
        self.max = Some(self.max.map_or(latency, |m| m.max(latency)));
    }

    pub fn merge(&mut self, other: Self) {
        self.total += other.total;
        self.count += other.count;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Mean latency, zero when nothing was observed.
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        match u32::try_from(self.count) {
            Ok(n) => self.total / n,
            Err(_) => self.total.div_f64(self.count as f64),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Everything virtual users report into, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct Stats {
    counters: IntervalCounters,
    latencies: Mutex<LatencyAggregate>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_started(&self) {
        self.counters.request_started();
    }

    /// Fold one request outcome into the counters and the latency window.
    pub fn record(&self, outcome: &Result<Duration, IssueError>) {
        let latency = match outcome {
            Ok(latency) => Some(*latency),
            Err(e) => e.latency(),
        };
        if let Some(latency) = latency {
            self.latencies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .consume(latency);
        }
        self.counters.request_finished(outcome.is_ok());
    }

    pub fn in_flight(&self) -> u64 {
        self.counters.in_flight()
    }

    pub fn flush(&self) -> IntervalSnapshot {
        self.counters.flush()
    }

    /// Take every latency recorded since the last call, leaving an empty window.
    pub fn take_latencies(&self) -> LatencyAggregate {
        std::mem::take(&mut *self.latencies.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn transport() -> Result<Duration, IssueError> {
        Err(IssueError::Transport("refused".into()))
    }

    #[test]
    fn flush_counts_successes_and_failures() {
        let stats = Stats::new();
        for i in 0..10 {
            stats.request_started();
            if i % 3 == 0 && i > 0 {
                stats.record(&transport());
            } else {
                stats.record(&Ok(Duration::from_millis(10)));
            }
        }

        let snapshot = stats.flush();
        assert_eq!(snapshot.completed, 7);
        assert_eq!(snapshot.failed, 3);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[test]
    fn idle_flush_resets_intervals_but_keeps_the_gauge() {
        let stats = Stats::new();
        stats.request_started();
        stats.request_started();
        stats.request_started();
        stats.record(&Ok(Duration::from_millis(5)));

        assert_eq!(
            stats.flush(),
            IntervalSnapshot {
                in_flight: 2,
                completed: 1,
                failed: 0
            }
        );
        assert_eq!(
            stats.flush(),
            IntervalSnapshot {
                in_flight: 2,
                completed: 0,
                failed: 0
            }
        );
    }

    #[test]
    fn in_flight_never_goes_negative() {
        let counters = IntervalCounters::default();
        counters.request_finished(false);
        counters.request_finished(true);

        let snapshot = counters.flush();
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
    }

    #[test]
    fn application_errors_record_latency_transport_errors_do_not() {
        let stats = Stats::new();
        stats.request_started();
        stats.record(&Err(IssueError::Application {
            status: 500,
            latency: Duration::from_millis(80),
        }));
        stats.request_started();
        stats.record(&transport());

        let latencies = stats.take_latencies();
        assert_eq!(latencies.count, 1);
        assert_eq!(latencies.total, Duration::from_millis(80));
        assert_eq!(stats.flush().failed, 2);
    }

    #[test]
    fn latency_window_averages_and_empties() {
        let stats = Stats::new();
        for ms in [100, 200, 300] {
            stats.request_started();
            stats.record(&Ok(Duration::from_millis(ms)));
        }

        let window = stats.take_latencies();
        assert_eq!(window.average(), Duration::from_millis(200));
        assert_eq!(window.min, Some(Duration::from_millis(100)));
        assert_eq!(window.max, Some(Duration::from_millis(300)));
        assert!(stats.take_latencies().is_empty());
        assert_eq!(LatencyAggregate::new().average(), Duration::ZERO);
    }

    #[test]
    fn merge_is_order_independent() {
        let mut a = LatencyAggregate::new();
        a.consume(Duration::from_millis(10));
        let mut b = LatencyAggregate::new();
        b.consume(Duration::from_millis(30));
        b.consume(Duration::from_millis(20));

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.count, 3);
        assert_eq!(ab.min, Some(Duration::from_millis(10)));
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let stats = Arc::new(Stats::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.request_started();
                        stats.record(&Ok(Duration::from_millis(1)));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let snapshot = stats.flush();
        assert_eq!(snapshot.completed, 8000);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(stats.take_latencies().count, 8000);
    }
}
