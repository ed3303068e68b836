//! Staged ramps — a scripted control actor.
//!
//! A [`StageDriver`] walks a list of [`Stage`]s and pushes target-concurrency
//! updates through a [`ControlHandle`], exactly like a human dragging a slider.
//! Each stage linearly ramps the target from the previous level to its own
//! `target` over its `duration`:
//!
//! ```text
//! t = elapsed / duration
//! users(t) = round(start + (end - start) * t)
//! ```
//!
//! A stage with `Duration::ZERO` jumps to its target instantly, which makes
//! spikes and non-zero starting points easy to express. After the last stage
//! the final target is held; the driver does not reset it.
use std::time::Duration;

use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::{control::ControlHandle, error::ControlError};

/// Ramp to `target` users over `duration`.
///
/// `Stage::new(Duration::from_secs(30), 50)` ramps to 50 users over 30s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct StageDriver {
    pub stages: Vec<Stage>,
    /// How often the interpolated target is pushed.
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
}

impl StageDriver {
    /// Run every stage to completion, then return with the last target held.
    ///
    /// Stops early with [`ControlError::Closed`] if the engine shuts down.
    pub async fn drive(&self, control: &ControlHandle) -> Result<(), ControlError> {
        let mut level = control.target();
        let total = self.stages.len();
        let tick = self.tick.max(Duration::from_millis(1));

        for (i, stage) in self.stages.iter().enumerate() {
            tracing::info!("Starting stage {}/{total}: {} users", i + 1, stage.target);
            if stage.duration.is_zero() {
                control.set_target(stage.target)?;
                level = stage.target;
                continue;
            }

            let stage_start = Instant::now();
            let mut next_tick = stage_start;
            loop {
                let elapsed = Instant::now().duration_since(stage_start);
                if elapsed >= stage.duration {
                    break;
                }
                control.set_target(interpolate_target(
                    elapsed,
                    stage.duration,
                    level,
                    stage.target,
                ))?;
                next_tick += tick;
                tokio::time::sleep_until(next_tick).await;
            }
            // Land exactly on the target so the next stage starts from it.
            control.set_target(stage.target)?;
            level = stage.target;
            tracing::info!("Finished stage {}/{total}", i + 1);
        }
        Ok(())
    }
}

/// Target user count `elapsed` into a stage ramping from `start` to `end`.
///
/// Elapsed time past the stage duration is clamped to the end target.
pub fn interpolate_target(
    elapsed: Duration,
    stage_duration: Duration,
    start: usize,
    end: usize,
) -> usize {
    if stage_duration.is_zero() {
        return end;
    }
    // Interpolation factor [0.0..1.0]
    let t = (elapsed.as_secs_f64() / stage_duration.as_secs_f64()).min(1.0);
    let users = start as f64 + (end as f64 - start as f64) * t;
    users.round().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Workload;

    mod interpolate_target {
        use super::*;

        #[test]
        fn ramp_up() {
            for i in 0..10 {
                let users =
                    interpolate_target(Duration::from_secs(i), Duration::from_secs(10), 0, 100);
                assert_eq!(users, (i * 10) as usize);
            }
        }

        #[test]
        fn ramp_down() {
            for i in 0..10 {
                let users =
                    interpolate_target(Duration::from_secs(i), Duration::from_secs(10), 100, 0);
                assert_eq!(users, (100 - i * 10) as usize);
            }
        }

        #[test]
        fn hold_steady() {
            for i in 0..10 {
                let users =
                    interpolate_target(Duration::from_secs(i), Duration::from_secs(10), 40, 40);
                assert_eq!(users, 40);
            }
        }

        #[test]
        fn elapsed_over_duration_caps_at_end_target() {
            for i in 0..10 {
                let users = interpolate_target(
                    Duration::from_secs(10 + i),
                    Duration::from_secs(10),
                    0,
                    100,
                );
                assert_eq!(users, 100);
            }
        }

        #[test]
        fn fractional_levels_round_to_nearest() {
            let users =
                interpolate_target(Duration::from_millis(250), Duration::from_secs(1), 0, 10);
            assert_eq!(users, 3);
            assert_eq!(
                interpolate_target(Duration::from_secs(1), Duration::ZERO, 7, 2),
                2
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drives_targets_through_every_stage() {
        let (control, reader) = ControlHandle::new(0, Workload::default());
        let driver = StageDriver::builder()
            .stages(vec![
                Stage::new(Duration::ZERO, 5),
                Stage::new(Duration::from_secs(1), 15),
                Stage::new(Duration::from_secs(1), 0),
            ])
            .build();

        let observer = {
            let mut target = reader.target.clone();
            tokio::spawn(async move {
                let mut seen = vec![*target.borrow_and_update()];
                while target.changed().await.is_ok() {
                    seen.push(*target.borrow_and_update());
                }
                seen
            })
        };

        driver.drive(&control).await.unwrap();
        assert_eq!(control.target(), 0);

        drop(control);
        drop(reader);
        let seen = observer.await.unwrap();
        assert!(seen.contains(&5));
        assert!(seen.contains(&15));
        assert_eq!(seen.last(), Some(&0));
        let peak = seen.iter().position(|&u| u == 15).unwrap();
        assert!(seen[..peak].windows(2).all(|w| w[0] <= w[1]));
        assert!(seen[peak..].windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_engine_shuts_down() {
        let (control, _reader) = ControlHandle::new(0, Workload::default());
        control.shutdown();
        let driver = StageDriver::builder()
            .stages(vec![Stage::new(Duration::from_secs(5), 10)])
            .build();

        assert_eq!(driver.drive(&control).await, Err(ControlError::Closed));
    }
}
