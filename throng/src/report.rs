use std::future::Future;
use std::io::Write;

use tokio::sync::mpsc;

use crate::Event;

/// A [`Reporter`] consumes [`Event`]s and performs side effects: drawing a
/// chart, writing a log line, feeding an autoscaling controller.
///
/// Reporters are the I/O boundary of the engine's outbound side. Keeping them
/// separate lets the engine stay oblivious to whatever presentation surface is
/// attached to it.
///
/// # Example
/// ```rust
/// use throng::{Event, Reporter};
///
/// struct Counter(std::sync::atomic::AtomicUsize);
///
/// impl<E: Event> Reporter<E> for Counter {
///     async fn report(&self, _: &E) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter<E: Event> {
    fn report(
        &self,
        event: &E,
    ) -> impl Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send;
}

/// Writes every event as one JSON line to stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutReporter;

impl<E: Event> Reporter<E> for StdoutReporter {
    async fn report(&self, event: &E) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let line = serde_json::to_string(event)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        Ok(())
    }
}

/// Pump every event from `events` into `reporter` until the stream closes.
///
/// Reporter failures are logged and skipped; they never stop the pump.
/// Returns the number of events successfully reported.
pub async fn forward<E, R>(mut events: mpsc::Receiver<E>, reporter: R) -> u64
where
    E: Event,
    R: Reporter<E>,
{
    let mut reported = 0;
    while let Some(event) = events.recv().await {
        match reporter.report(&event).await {
            Ok(()) => reported += 1,
            Err(e) => tracing::warn!("Reporter failed: {e}"),
        }
    }
    reported
}
