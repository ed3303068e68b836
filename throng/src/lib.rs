//! Throng — a live, resizable virtual-user load engine.
//!
//! Throng keeps a population of simulated users hammering a service while you
//! watch how it copes. Every user independently issues a request, waits for the
//! answer, idles for a random think time, and goes again. The size of the
//! population and the amount of work each request asks for can be changed at
//! any moment; the engine converges to the new settings without interrupting
//! requests that are already in flight.
//!
//! What comes out is a bounded, time-ordered series of samples combining the
//! measured latency with an externally observed signal (CPU utilization, number
//! of replicas, ...), ready to be charted or fed into a decision loop such as an
//! autoscaler.
//!
//! # Architecture
//!
//! - [`Issuer`]: performs one unit of work against the target and reports the
//!   latency or an [`error::IssueError`]. [`issuer::HttpIssuer`] covers the common
//!   `GET /compute?ms=N` case.
//! - [`user::VirtualUser`]: a request/think state machine running as its own task.
//! - [`pool::UserPool`]: owns the users and reconciles their number toward the
//!   target, evicting cooperatively when shrinking.
//! - [`stats::Stats`]: lock-free interval counters plus the latency window.
//! - [`sample`]: the [`sample::Sampler`] step and the bounded [`sample::SampleBuffer`].
//! - [`SignalSource`]: the out-of-band infrastructure feed.
//! - [`ControlHandle`]: the latest-write-wins control channel.
//! - [`Engine`]: configuration plus the driver tying all of the above together.
//! - [`Reporter`]: consumes the [`EngineEvent`]s the engine emits.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use throng::{
//!     Engine, Workload,
//!     issuer::HttpIssuer,
//!     report::{StdoutReporter, forward},
//!     signal::{HttpSignalSource, MetricsFormat},
//!     stage::{Stage, StageDriver},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let issuer = HttpIssuer::builder().base_url("http://localhost:8080").build();
//!     let signal = HttpSignalSource::builder()
//!         .url("http://localhost:8080/metrics")
//!         .format(MetricsFormat::CpuPct)
//!         .build();
//!
//!     let (engine, events) = Engine::builder()
//!         .initial_workload(Workload::from_millis(20)?)
//!         .build()
//!         .start(issuer, signal);
//!     let reporter = tokio::spawn(forward(events, StdoutReporter));
//!
//!     // Ramp to 50 users over 30 seconds, hold for a minute, then back off.
//!     StageDriver::builder()
//!         .stages(vec![
//!             Stage::new(Duration::from_secs(30), 50),
//!             Stage::new(Duration::from_secs(60), 50),
//!             Stage::new(Duration::from_secs(10), 0),
//!         ])
//!         .build()
//!         .drive(engine.control())
//!         .await?;
//!
//!     let summary = engine.shutdown().await?;
//!     reporter.await?;
//!     println!("{summary:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `macros`: re-exports the `#[event]` attribute for defining custom events.
//!   (Enabled by default)
//! - `http`: reqwest-backed [`issuer::HttpIssuer`] and [`signal::HttpSignalSource`].
//!   (Enabled by default)
//! - `internals`: exposes the engine's background tasks for embedding them in a
//!   custom runtime layout. Unstable.

/// Control channel
pub mod control;
/// The engine driver and its configuration
pub mod engine;
/// Error types
pub mod error;
/// Outbound events
pub mod event;
/// Request issuers
pub mod issuer;
/// Virtual user pool
pub mod pool;
/// Event reporters
pub mod report;
/// Samples and the sample buffer
pub mod sample;
/// External signal sources
pub mod signal;
/// Scripted ramps
pub mod stage;
/// Interval counters and latency windows
pub mod stats;
/// Virtual users
pub mod user;

pub use control::{ControlHandle, Workload};
pub use engine::{Engine, EngineSummary, RunningEngine};
pub use event::{EngineEvent, Event};
pub use issuer::Issuer;
pub use report::Reporter;
pub use sample::{Sample, ScaleEvent};
pub use signal::SignalSource;

#[cfg(feature = "macros")]
/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use throng_macros::*;
}
