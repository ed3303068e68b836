use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};

use crate::{sample::Sample, stats::IntervalSnapshot};
use throng_macros::event;

/// An `Event` is a value that leaves the engine through its event channel.
///
/// Events are the only thing a presentation surface (a dashboard, a log shipper,
/// an autoscaling controller) ever sees of the engine. They are plain data: no
/// handles, no shared state, nothing that would tie a consumer to the engine's
/// internals.
///
/// ## Design principles
/// - **Serializable:** every event can be written as JSON or shipped across a
///   process boundary without extra glue.
/// - **Comparable:** events implement [`PartialEq`] so consumers and tests can
///   diff them directly.
/// - **Thread-safe and clonable:** events are `Send`, `Sync` and `Clone`, so one
///   stream can be fanned out to several reporters.
///
/// The `#[event]` attribute derives all of the above and implements this trait.
///
/// ## Example
/// ```rust
/// use throng::{Event, macros::event};
///
/// #[event]
/// struct QueueDepth {
///     depth: u64,
/// }
/// ```
pub trait Event
where
    Self: Serialize + DeserializeOwned + PartialEq + Send + Sync + Debug + Clone,
{
}

/// Everything the engine emits, tagged by cadence.
#[event]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Emitted at the stats-flush cadence.
    Stats(IntervalSnapshot),
    /// Emitted at the sampling cadence, after the sample was appended to the buffer.
    Sample(Sample),
}
