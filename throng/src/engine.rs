//! Engine — wires the pool, the stats aggregator and the sampler together.
//!
//! [`Engine::start`] spawns two background tasks:
//!
//! 1. The **driver**, a single task that owns three independent tickers:
//!    - *reconcile*: reads the latest target from the control channel and
//!      reconciles the [`UserPool`] toward it;
//!    - *flush*: snapshots and resets the interval counters and emits an
//!      [`EngineEvent::Stats`];
//!    - *sample*: drains the latency window, combines it with the freshest
//!      external signal, appends a [`Sample`] to the buffer and emits an
//!      [`EngineEvent::Sample`].
//!
//!    Because one task runs all three, each step executes atomically with
//!    respect to the others: a flush never observes half a reconciliation.
//! 2. The **signal poller**, which fetches the external signal at the sampling
//!    cadence and publishes each result through a `watch` cell. Slow or failing
//!    metrics endpoints therefore never delay reconciliation or sampling; the
//!    sampler just consumes whatever fresh reading is there.
//!
//! Virtual users run as their own tasks inside the pool and only share the
//! atomic counters, the latency window and the workload cell.
//!
//! Events go out over a bounded channel and the driver never waits on it.
//! While a consumer lags, stats flushes are deferred (their counts carry over
//! into the next flush) and sample events that find the channel full are
//! dropped and counted in [`EngineSummary::events_dropped`]. Samples always
//! reach the [`SampleBuffer`], and reconciliation and shutdown are never held
//! up. A dropped receiver simply disables event delivery.
//!
//! # Example
//! ```rust,no_run
//! use std::time::Duration;
//! use throng::{Engine, Workload, issuer::HttpIssuer, signal::NoSignal};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let issuer = HttpIssuer::builder().base_url("http://localhost:8080").build();
//! let (engine, mut events) = Engine::builder().build().start(issuer, NoSignal);
//!
//! engine.control().set_workload(Workload::from_millis(50)?)?;
//! engine.control().set_target(20)?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! #   break;
//! }
//! let summary = engine.shutdown().await?;
//! println!("{} requests completed", summary.total_completed);
//! # Ok(())
//! # }
//! ```
use std::{
    sync::{Arc, atomic::AtomicUsize},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use typed_builder::TypedBuilder;

use crate::{
    control::{ControlHandle, ControlReader, Workload},
    error::{EngineError, SignalError},
    event::EngineEvent,
    issuer::Issuer,
    pool::{PoolView, UserPool},
    sample::{Sample, SampleBuffer, Sampler},
    signal::{SignalReading, SignalSource},
    stats::Stats,
    user::{ThinkTime, UserContext, UserId, UserState},
};
use internals::*;

/// Engine configuration. Every cadence and bound has a working default.
#[derive(Clone, Debug, TypedBuilder)]
pub struct Engine {
    /// How often the pool is reconciled toward the target.
    #[builder(default = Duration::from_millis(500))]
    pub reconcile_interval: Duration,
    /// How often interval counters are flushed and emitted.
    #[builder(default = Duration::from_millis(500))]
    pub flush_interval: Duration,
    /// How often a sample is taken. Also the signal polling cadence.
    #[builder(default = Duration::from_millis(500))]
    pub sample_interval: Duration,
    #[builder(default)]
    pub think_time: ThinkTime,
    /// Maximum number of samples kept.
    #[builder(default = 2000)]
    pub buffer_capacity: usize,
    /// Optional time window on top of the count cap, e.g. 900 seconds.
    #[builder(default, setter(strip_option))]
    pub buffer_window: Option<Duration>,
    /// Capacity of the outbound event channel.
    #[builder(default = 1024)]
    pub event_capacity: usize,
    #[builder(default = 0)]
    pub initial_target: usize,
    #[builder(default)]
    pub initial_workload: Workload,
    /// Baseline population for scale-event detection.
    #[builder(default, setter(strip_option))]
    pub initial_population: Option<u32>,
}

/// Totals accumulated over a whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub users_spawned: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub samples: u64,
    /// Sample events that found the channel full and were not delivered.
    pub events_dropped: u64,
}

/// Receiving end of the engine's outbound events.
pub type EventStream = mpsc::Receiver<EngineEvent>;

/// A started engine. Dropping it without calling [`RunningEngine::shutdown`]
/// leaves the background tasks running until the control handle signals
/// shutdown.
pub struct RunningEngine {
    control: ControlHandle,
    buffer: Arc<SampleBuffer>,
    stats: Arc<Stats>,
    pool: PoolView,
    driver: JoinHandle<EngineSummary>,
    poller: JoinHandle<()>,
}

impl Engine {
    /// Spawn the engine's tasks on the current Tokio runtime.
    pub fn start<I, S>(self, issuer: I, signal: S) -> (RunningEngine, EventStream)
    where
        I: Issuer,
        S: SignalSource,
    {
        let (control, reader) = ControlHandle::new(self.initial_target, self.initial_workload);
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity.max(1));
        let stats = Arc::new(Stats::new());
        let buffer = Arc::new(SampleBuffer::new(self.buffer_capacity, self.buffer_window));

        let pool = UserPool::new(UserContext {
            issuer: Arc::new(issuer),
            stats: Arc::clone(&stats),
            workload: reader.workload.clone(),
            think_time: self.think_time,
            live: Arc::new(AtomicUsize::new(0)),
        });
        let view = pool.view();

        tracing::info!("Spawning signal poller...");
        let (signal_tx, signal_rx) = watch::channel(SignalUpdate::default());
        let poller = tokio::spawn(signal_poller_task(
            reader.clone(),
            signal,
            self.sample_interval,
            signal_tx,
        ));

        tracing::info!("Spawning engine driver...");
        let driver = tokio::spawn(driver_task(DriverContext {
            config: self,
            control: reader,
            pool,
            stats: Arc::clone(&stats),
            buffer: Arc::clone(&buffer),
            events: Outbox::new(events_tx),
            signal: signal_rx,
        }));

        (
            RunningEngine {
                control,
                buffer,
                stats,
                pool: view,
                driver,
                poller,
            },
            events_rx,
        )
    }
}

impl RunningEngine {
    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    /// Shared view of the sample series.
    pub fn samples(&self) -> Arc<SampleBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Current number of outstanding requests.
    pub fn in_flight(&self) -> u64 {
        self.stats.in_flight()
    }

    /// Users currently admitted. Converges to the target between reconciliations.
    pub fn active_users(&self) -> usize {
        self.pool.active_users()
    }

    pub fn active_ids(&self) -> Vec<UserId> {
        self.pool.active_ids()
    }

    pub fn user_states(&self) -> Vec<(UserId, UserState)> {
        self.pool.user_states()
    }

    /// Users that have not terminated yet, evicted ones still finishing included.
    pub fn live_users(&self) -> usize {
        self.pool.live_users()
    }

    /// Stop every task, abort the users and return the run totals.
    pub async fn shutdown(self) -> Result<EngineSummary, EngineError> {
        tracing::info!("Shutting down engine...");
        self.control.shutdown();
        let summary = self.driver.await?;
        self.poller.await?;
        tracing::info!(
            "Engine stopped: {} completed, {} failed, {} users spawned",
            summary.total_completed,
            summary.total_failed,
            summary.users_spawned
        );
        Ok(summary)
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// Background tasks behind [`Engine::start`].
mod internals {
    use super::*;
    use tokio::sync::mpsc::error::TrySendError;

    /// Latest result published by the signal poller, numbered so the sampler
    /// can tell a fresh reading from one it already consumed.
    #[derive(Debug, Default)]
    pub struct SignalUpdate {
        pub seq: u64,
        pub reading: Option<SignalReading>,
    }

    pub struct DriverContext<I: Issuer> {
        pub config: Engine,
        pub control: ControlReader,
        pub pool: UserPool<I>,
        pub stats: Arc<Stats>,
        pub buffer: Arc<SampleBuffer>,
        pub events: Outbox,
        pub signal: watch::Receiver<SignalUpdate>,
    }

    fn ticker(period: Duration) -> tokio::time::Interval {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Sending side of the event channel that never waits for the consumer.
    pub struct Outbox {
        events: mpsc::Sender<EngineEvent>,
        dropped: u64,
        lagging: bool,
    }

    impl Outbox {
        pub fn new(events: mpsc::Sender<EngineEvent>) -> Self {
            Self {
                events,
                dropped: 0,
                lagging: false,
            }
        }

        /// Whether an event sent now would be accepted or discarded as undeliverable.
        /// The driver is the only sender, so room seen here is still there when it sends.
        pub fn has_room(&self) -> bool {
            self.events.is_closed() || self.events.capacity() > 0
        }

        pub fn dropped(&self) -> u64 {
            self.dropped
        }

        pub fn emit(&mut self, event: EngineEvent) {
            match self.events.try_send(event) {
                Ok(()) => {
                    if self.lagging {
                        self.lagging = false;
                        tracing::info!(
                            "Event consumer caught up after {} dropped events.",
                            self.dropped
                        );
                    }
                }
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    if !self.lagging {
                        self.lagging = true;
                        tracing::warn!("Event consumer is lagging, dropping sample events.");
                    }
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// The single task that serializes reconciliation, flushing and sampling.
    pub async fn driver_task<I: Issuer>(ctx: DriverContext<I>) -> EngineSummary {
        let DriverContext {
            config,
            mut control,
            pool,
            stats,
            buffer,
            mut events,
            mut signal,
        } = ctx;

        let start = Instant::now();
        let mut sampler = Sampler::new(config.initial_population);
        let mut last_signal_seq = 0;
        let mut summary = EngineSummary::default();

        let mut reconcile = ticker(config.reconcile_interval);
        let mut flush = ticker(config.flush_interval);
        let mut sample = ticker(config.sample_interval);

        tracing::info!("Engine running!");
        let mut shutdown = control.clone();
        let stop = shutdown.shutdown_requested();
        tokio::pin!(stop);
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = reconcile.tick() => {
                    let target = *control.target.borrow_and_update();
                    pool.reconcile(target);
                }
                // Deferred while the consumer lags; the counts carry over.
                _ = flush.tick(), if events.has_room() => {
                    let snapshot = stats.flush();
                    summary.total_completed += snapshot.completed;
                    summary.total_failed += snapshot.failed;
                    events.emit(EngineEvent::Stats(snapshot));
                }
                _ = sample.tick() => {
                    let reading = {
                        let update = signal.borrow_and_update();
                        if update.seq != last_signal_seq {
                            last_signal_seq = update.seq;
                            update.reading
                        } else {
                            None
                        }
                    };
                    let latencies = stats.take_latencies();
                    let point: Sample = sampler.sample(start.elapsed(), &latencies, reading);
                    buffer.append(point.clone());
                    summary.samples += 1;
                    events.emit(EngineEvent::Sample(point));
                }
            }
        }

        tracing::info!("Driver received shutdown signal.");
        summary.users_spawned = pool.spawned_total();
        summary.events_dropped = events.dropped();
        pool.shutdown().await;
        // Requests that finished after the last flush still count.
        let tail = stats.flush();
        summary.total_completed += tail.completed;
        summary.total_failed += tail.failed;
        summary
    }

    /// Poll the external signal at `period`, publishing every successful reading.
    ///
    /// A failed fetch publishes nothing, so the sampler sees no fresh reading
    /// for that cycle and carries the previous values forward.
    pub async fn signal_poller_task<S: SignalSource>(
        mut control: ControlReader,
        source: S,
        period: Duration,
        updates: watch::Sender<SignalUpdate>,
    ) {
        let main_task = async {
            let mut interval = ticker(period);
            let mut seq = 0;
            loop {
                interval.tick().await;
                let result: Result<SignalReading, SignalError> = source.fetch().await;
                match result {
                    Ok(reading) => {
                        seq += 1;
                        updates.send_replace(SignalUpdate {
                            seq,
                            reading: Some(reading),
                        });
                    }
                    Err(e) => tracing::warn!("External signal unavailable this cycle: {e}"),
                }
            }
        };

        tokio::select! {
            _ = main_task => {}
            _ = control.shutdown_requested() => {
                tracing::debug!("Signal poller received shutdown signal.");
            }
        };
    }
}
