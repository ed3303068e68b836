//! Samples — the time-ordered series the engine produces for monitoring.
//!
//! The [`Sampler`] turns one interval's worth of latencies plus the freshest
//! external signal into a [`Sample`]. The [`SampleBuffer`] keeps the most
//! recent samples, evicting the oldest first once a count cap (and optionally
//! a time window) is exceeded.
use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::{Event, signal::SignalReading, stats::LatencyAggregate};
use throng_macros::event;

/// Direction of a change in the externally observed population.
#[event]
#[derive(Copy, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScaleEvent {
    ScaleUp,
    ScaleDown,
}

impl ScaleEvent {
    /// `Some` exactly when `current` strictly differs from `previous`.
    pub fn between(previous: u32, current: u32) -> Option<Self> {
        match current.cmp(&previous) {
            std::cmp::Ordering::Greater => Some(ScaleEvent::ScaleUp),
            std::cmp::Ordering::Less => Some(ScaleEvent::ScaleDown),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// One point of the monitoring series. Immutable once appended.
#[event]
pub struct Sample {
    /// Seconds since the engine started.
    pub timestamp: f64,
    /// Mean latency over the interval, zero if nothing completed.
    pub latency_average: Duration,
    /// How many latencies went into `latency_average`.
    pub latency_count: u64,
    /// Last known external metric, if one was ever observed.
    pub external_signal: Option<f64>,
    /// Last known external population, if one was ever observed.
    pub population: Option<u32>,
    /// Whether a non-empty signal reading arrived during this interval.
    /// Always `false` for sources that never observe anything.
    pub signal_fresh: bool,
    pub event: Option<ScaleEvent>,
}

/// Stateful step that builds samples, remembering what it saw last time.
#[derive(Debug, Default)]
pub struct Sampler {
    last_value: Option<f64>,
    last_population: Option<u32>,
    last_timestamp: f64,
}

impl Sampler {
    /// `initial_population` is the baseline the first observed population is
    /// compared against. Without one, the first observation records no event.
    pub fn new(initial_population: Option<u32>) -> Self {
        Self {
            last_population: initial_population,
            ..Self::default()
        }
    }

    /// Build the sample for this tick.
    ///
    /// `reading` is `None` when no fresh signal arrived this interval; the
    /// previous values are then carried forward and no scale event is raised.
    pub fn sample(
        &mut self,
        elapsed: Duration,
        latencies: &LatencyAggregate,
        reading: Option<SignalReading>,
    ) -> Sample {
        let mut event = None;
        if let Some(reading) = reading {
            if let Some(value) = reading.value {
                self.last_value = Some(value);
            }
            if let Some(current) = reading.population {
                if let Some(previous) = self.last_population {
                    event = ScaleEvent::between(previous, current);
                }
                self.last_population = Some(current);
            }
        }

        // Never step backwards, even if the caller's clock does.
        let timestamp = elapsed.as_secs_f64().max(self.last_timestamp);
        self.last_timestamp = timestamp;

        Sample {
            timestamp,
            latency_average: latencies.average(),
            latency_count: latencies.count,
            external_signal: self.last_value,
            population: self.last_population,
            signal_fresh: reading.is_some_and(|r| !r.is_empty()),
            event,
        }
    }
}

/// Bounded, time-ordered store of samples.
///
/// Appends take a short write lock; reads copy the contents out under a read
/// lock, so a reader always sees a consistent prefix of the series.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: RwLock<VecDeque<Sample>>,
    capacity: usize,
    window: Option<Duration>,
}

impl SampleBuffer {
    /// A `capacity` of zero is treated as one.
    pub fn new(capacity: usize, window: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            window,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append and evict from the front until both bounds hold.
    ///
    /// A sample older than the newest one is clamped to the newest timestamp
    /// so the series stays non-decreasing.
    pub fn append(&self, mut sample: Sample) {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = samples.back() {
            if sample.timestamp < last.timestamp {
                sample.timestamp = last.timestamp;
            }
        }
        let newest = sample.timestamp;
        samples.push_back(sample);

        while samples.len() > self.capacity {
            samples.pop_front();
        }
        if let Some(window) = self.window {
            let cutoff = newest - window.as_secs_f64();
            while samples.front().is_some_and(|s| s.timestamp < cutoff) {
                samples.pop_front();
            }
        }
    }

    /// Copy of the whole series, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.samples.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
