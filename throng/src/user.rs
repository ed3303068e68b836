//! Virtual users — independent request/think loops.
//!
//! A virtual user is an explicit state machine:
//!
//! ```text
//! Requesting --(issuer resolves)--> Thinking --(idle elapsed, still admitted)--> Requesting
//!                                       |
//!                                       +--(idle elapsed, evicted)--> Terminated
//! ```
//!
//! Liveness is checked only at the `Thinking -> Requesting` boundary. A user
//! evicted while its request is outstanding still finishes that request and
//! reports it; it simply never issues another one.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
    },
    time::Duration,
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch::Receiver;

use crate::{control::Workload, issuer::Issuer, stats::Stats};

/// Monotonically assigned, never reused while the pool is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vu-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum UserState {
    Requesting = 0,
    Thinking = 1,
    Terminated = 2,
}

impl UserState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => UserState::Requesting,
            1 => UserState::Thinking,
            _ => UserState::Terminated,
        }
    }
}

/// Idle interval between two requests of the same user, drawn uniformly from
/// `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThinkTime {
    min: Duration,
    max: Duration,
}

impl ThinkTime {
    /// Bounds are swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn fixed(d: Duration) -> Self {
        Self { min: d, max: d }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_millis(500))
    }
}

/// The pool's handle on one user: admission flag plus an observable state.
#[derive(Debug)]
pub struct UserSlot {
    admitted: AtomicBool,
    state: AtomicU8,
}

impl UserSlot {
    pub(crate) fn new() -> Self {
        Self {
            admitted: AtomicBool::new(true),
            state: AtomicU8::new(UserState::Requesting as u8),
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }

    pub(crate) fn evict(&self) {
        self.admitted.store(false, Ordering::Release);
    }

    pub fn state(&self) -> UserState {
        UserState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: UserState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Shared, read-mostly resources every user needs.
pub struct UserContext<I: Issuer> {
    pub issuer: Arc<I>,
    pub stats: Arc<Stats>,
    pub workload: Receiver<Workload>,
    pub think_time: ThinkTime,
    /// Users not yet `Terminated`, evicted ones included.
    pub live: Arc<AtomicUsize>,
}

impl<I: Issuer> Clone for UserContext<I> {
    fn clone(&self) -> Self {
        Self {
            issuer: Arc::clone(&self.issuer),
            stats: Arc::clone(&self.stats),
            workload: self.workload.clone(),
            think_time: self.think_time,
            live: Arc::clone(&self.live),
        }
    }
}

pub struct VirtualUser<I: Issuer> {
    id: UserId,
    slot: Arc<UserSlot>,
    ctx: UserContext<I>,
}

impl<I: Issuer> VirtualUser<I> {
    /// Create a user already counted as in flight.
    ///
    /// The caller must have called [`Stats::request_started`] for the first
    /// request, so the in-flight gauge is correct as soon as the user exists.
    pub(crate) fn new(id: UserId, slot: Arc<UserSlot>, ctx: UserContext<I>) -> Self {
        ctx.live.fetch_add(1, Ordering::AcqRel);
        Self { id, slot, ctx }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    /// Drive the state machine until the user is evicted.
    pub async fn run(self) -> UserId {
        tracing::debug!("{} started.", self.id);
        let mut state = UserState::Requesting;
        loop {
            self.slot.set_state(state);
            state = match state {
                UserState::Requesting => {
                    let workload = *self.ctx.workload.borrow();
                    let outcome = self.ctx.issuer.issue(workload).await;
                    tracing::trace!("{} resolved: {:?}", self.id, outcome);
                    self.ctx.stats.record(&outcome);
                    UserState::Thinking
                }
                UserState::Thinking => {
                    let pause = self.ctx.think_time.sample(&mut rand::rng());
                    tokio::time::sleep(pause).await;
                    if self.slot.is_admitted() {
                        self.ctx.stats.request_started();
                        UserState::Requesting
                    } else {
                        UserState::Terminated
                    }
                }
                UserState::Terminated => break,
            };
        }
        tracing::debug!("{} terminated.", self.id);
        self.id
    }
}

impl<I: Issuer> Drop for VirtualUser<I> {
    fn drop(&mut self) {
        // Runs on normal termination and when the task is aborted mid-request.
        self.slot.set_state(UserState::Terminated);
        self.ctx.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IssueError;
    use tokio::sync::watch;

    struct Fixed(Duration);

    impl Issuer for Fixed {
        async fn issue(&self, _: Workload) -> Result<Duration, IssueError> {
            tokio::time::sleep(self.0).await;
            Ok(self.0)
        }
    }

    fn context(issuer: Fixed) -> (UserContext<Fixed>, watch::Sender<Workload>) {
        let (tx, rx) = watch::channel(Workload::default());
        (
            UserContext {
                issuer: Arc::new(issuer),
                stats: Arc::new(Stats::new()),
                workload: rx,
                think_time: ThinkTime::fixed(Duration::from_millis(300)),
                live: Arc::new(AtomicUsize::new(0)),
            },
            tx,
        )
    }

    #[test]
    fn think_time_stays_in_range() {
        let think = ThinkTime::new(Duration::from_millis(500), Duration::from_millis(200));
        assert_eq!(think.min(), Duration::from_millis(200));

        let mut rng = rand::rng();
        for _ in 0..1000 {
            let d = think.sample(&mut rng);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(500));
        }
        assert_eq!(
            ThinkTime::fixed(Duration::from_millis(7)).sample(&mut rng),
            Duration::from_millis(7)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_user_finishes_its_request_then_terminates() {
        let (ctx, _tx) = context(Fixed(Duration::from_millis(100)));
        let stats = Arc::clone(&ctx.stats);
        let live = Arc::clone(&ctx.live);
        let slot = Arc::new(UserSlot::new());

        stats.request_started();
        let user = VirtualUser::new(UserId(1), Arc::clone(&slot), ctx);
        assert_eq!(live.load(Ordering::Acquire), 1);
        let handle = tokio::spawn(user.run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(slot.state(), UserState::Requesting);
        slot.evict();

        assert_eq!(handle.await.unwrap(), UserId(1));
        assert_eq!(slot.state(), UserState::Terminated);
        assert_eq!(live.load(Ordering::Acquire), 0);

        let snapshot = stats.flush();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admitted_user_keeps_cycling() {
        let (ctx, _tx) = context(Fixed(Duration::from_millis(100)));
        let stats = Arc::clone(&ctx.stats);
        let slot = Arc::new(UserSlot::new());

        stats.request_started();
        let handle = tokio::spawn(VirtualUser::new(UserId(1), Arc::clone(&slot), ctx).run());

        // Each cycle is 100ms of request plus 300ms of thinking.
        tokio::time::sleep(Duration::from_millis(1150)).await;
        assert_eq!(stats.flush().completed, 3);
        assert_eq!(slot.state(), UserState::Thinking);
        assert_eq!(stats.in_flight(), 0);

        handle.abort();
        let _ = handle.await;
        assert_eq!(slot.state(), UserState::Terminated);
    }
}
