//! User pool manager — reconciles the live population toward a target.
//!
//! The pool owns every [`VirtualUser`]. Growing spawns fresh users with new,
//! strictly increasing ids; shrinking only *evicts* ids from the active set.
//! Evicted users are never aborted: they notice the eviction at their next
//! `Thinking -> Requesting` boundary and terminate on their own, so in-flight
//! requests always complete and get counted.
//!
//! A whole reconciliation runs under the pool lock, so a concurrent observer
//! never sees it half-applied. The lock is never held across an `.await`.
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::task::JoinSet;

use crate::issuer::Issuer;
use crate::user::{UserContext, UserId, UserSlot, UserState, VirtualUser};

/// What one reconciliation changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub spawned: Vec<UserId>,
    pub evicted: Vec<UserId>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.spawned.is_empty() && self.evicted.is_empty()
    }
}

struct PoolInner {
    next_id: u64,
    active: BTreeMap<UserId, Arc<UserSlot>>,
    tasks: JoinSet<UserId>,
    spawned_total: u64,
}

fn lock(inner: &Mutex<PoolInner>) -> MutexGuard<'_, PoolInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct UserPool<I: Issuer> {
    ctx: UserContext<I>,
    inner: Arc<Mutex<PoolInner>>,
}

impl<I: Issuer> UserPool<I> {
    pub fn new(ctx: UserContext<I>) -> Self {
        Self {
            ctx,
            inner: Arc::new(Mutex::new(PoolInner {
                next_id: 1,
                active: BTreeMap::new(),
                tasks: JoinSet::new(),
                spawned_total: 0,
            })),
        }
    }

    /// Read-only gauges over this pool that outlive a move of the pool itself.
    pub fn view(&self) -> PoolView {
        PoolView {
            inner: Arc::clone(&self.inner),
            live: Arc::clone(&self.ctx.live),
        }
    }

    /// Move the active set toward `target`. Never waits on any request.
    ///
    /// Shrinking evicts the newest users first. Must be called from within a
    /// Tokio runtime.
    pub fn reconcile(&self, target: usize) -> Reconciliation {
        let mut inner = lock(&self.inner);
        let mut change = Reconciliation::default();

        // Drop the join results of users that already terminated.
        while let Some(res) = inner.tasks.try_join_next() {
            if let Err(e) = res {
                if e.is_panic() {
                    tracing::error!("Virtual user panicked: {e}");
                }
            }
        }

        let active = inner.active.len();
        if active < target {
            for _ in active..target {
                let id = UserId(inner.next_id);
                inner.next_id += 1;
                inner.spawned_total += 1;

                let slot = Arc::new(UserSlot::new());
                // Counted before the task exists so the gauge matches the
                // number of users in `Requesting` the moment we return.
                self.ctx.stats.request_started();
                let user = VirtualUser::new(id, Arc::clone(&slot), self.ctx.clone());
                inner.tasks.spawn(user.run());
                inner.active.insert(id, slot);
                change.spawned.push(id);
            }
        } else if active > target {
            for _ in target..active {
                if let Some((id, slot)) = inner.active.pop_last() {
                    slot.evict();
                    change.evicted.push(id);
                }
            }
        }

        if !change.is_noop() {
            tracing::debug!(
                "Reconciled to {target}: +{} -{} users",
                change.spawned.len(),
                change.evicted.len()
            );
        }
        change
    }

    pub fn active_ids(&self) -> Vec<UserId> {
        self.view().active_ids()
    }

    pub fn active_users(&self) -> usize {
        self.view().active_users()
    }

    pub fn live_users(&self) -> usize {
        self.view().live_users()
    }

    pub fn spawned_total(&self) -> u64 {
        self.view().spawned_total()
    }

    pub fn user_states(&self) -> Vec<(UserId, UserState)> {
        self.view().user_states()
    }

    /// Abort every user, in-flight requests included, and wait for them to go.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut inner = lock(&self.inner);
            inner.active.clear();
            std::mem::take(&mut inner.tasks)
        };
        tracing::debug!("Aborting {} virtual users...", tasks.len());
        tasks.shutdown().await;
    }
}

/// Cheap, clonable gauges over a [`UserPool`].
#[derive(Clone)]
pub struct PoolView {
    inner: Arc<Mutex<PoolInner>>,
    live: Arc<AtomicUsize>,
}

impl PoolView {
    /// Ids currently admitted, in ascending order.
    pub fn active_ids(&self) -> Vec<UserId> {
        lock(&self.inner).active.keys().copied().collect()
    }

    pub fn active_users(&self) -> usize {
        lock(&self.inner).active.len()
    }

    /// Users that have not terminated yet, including evicted ones still
    /// finishing their last request or think pause.
    pub fn live_users(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn spawned_total(&self) -> u64 {
        lock(&self.inner).spawned_total
    }

    /// State of every admitted user.
    pub fn user_states(&self) -> Vec<(UserId, UserState)> {
        lock(&self.inner)
            .active
            .iter()
            .map(|(id, slot)| (*id, slot.state()))
            .collect()
    }
}
