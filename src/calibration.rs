//! Timed calibration window for the gaze-fusion library
//!
//! The window opens when the first absolute-orientation sample seeds the
//! filter, announces when it is about to close, and closes after a fixed
//! duration of sensor time. The fused orientation at the closing instant is
//! the wearer's zero reference.

use core::time::Duration;

use crate::types::CalibrationPhase;

/// Phase transition produced by the calibration window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationTransition {
    /// Window opened (`NotStarted -> InProgress`)
    Started,
    /// Nearly-done fraction elapsed (`InProgress -> NearlyDone`)
    AboutToFinish,
    /// Window closed (`NearlyDone -> Done`)
    Finished,
}

/// Calibration window state machine
///
/// # Example
/// ```
/// use std::time::Duration;
/// use gaze_fusion::calibration::{CalibrationTransition, CalibrationWindow};
///
/// let mut window = CalibrationWindow::new(Duration::from_secs(15), 0.8);
/// window.start(Duration::ZERO);
///
/// assert_eq!(window.advance(Duration::from_secs(5)), None);
/// assert_eq!(
///     window.advance(Duration::from_secs(12)),
///     Some(CalibrationTransition::AboutToFinish)
/// );
/// assert_eq!(
///     window.advance(Duration::from_secs(15)),
///     Some(CalibrationTransition::Finished)
/// );
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CalibrationWindow {
    /// Window length
    duration: Duration,
    /// Elapsed time after which the window is nearly done
    nearly_done_after: Duration,
    /// Current phase
    phase: CalibrationPhase,
    /// Timestamp at which the window opened
    started_at: Option<Duration>,
}

impl CalibrationWindow {
    /// Create a window of the given length
    ///
    /// `nearly_done_fraction` is clamped to `[0, 1]`.
    pub fn new(duration: Duration, nearly_done_fraction: f32) -> Self {
        let nearly_done_after = duration.mul_f32(nearly_done_fraction.clamp(0.0, 1.0));
        Self {
            duration,
            nearly_done_after,
            phase: CalibrationPhase::NotStarted,
            started_at: None,
        }
    }

    /// Open the window at `timestamp`
    ///
    /// Returns `None` if the window is already open or finished.
    pub fn start(&mut self, timestamp: Duration) -> Option<CalibrationTransition> {
        if self.phase != CalibrationPhase::NotStarted {
            return None;
        }
        self.phase = CalibrationPhase::InProgress;
        self.started_at = Some(timestamp);
        Some(CalibrationTransition::Started)
    }

    /// Advance the window to `timestamp`
    ///
    /// Returns at most one transition per call, so a sample that crosses both
    /// thresholds at once still produces `AboutToFinish` before `Finished`.
    /// Callers drain it with `while let`. Each transition happens once per
    /// episode.
    pub fn advance(&mut self, timestamp: Duration) -> Option<CalibrationTransition> {
        let elapsed = timestamp.saturating_sub(self.started_at?);

        match self.phase {
            CalibrationPhase::InProgress if elapsed >= self.nearly_done_after => {
                self.phase = CalibrationPhase::NearlyDone;
                Some(CalibrationTransition::AboutToFinish)
            }
            CalibrationPhase::NearlyDone if elapsed >= self.duration => {
                self.phase = CalibrationPhase::Done;
                Some(CalibrationTransition::Finished)
            }
            _ => None,
        }
    }

    /// Cancel the window and return to `NotStarted`
    pub fn reset(&mut self) {
        self.phase = CalibrationPhase::NotStarted;
        self.started_at = None;
    }

    /// Current phase
    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Time elapsed since the window opened, if it is open
    pub fn elapsed(&self, timestamp: Duration) -> Option<Duration> {
        self.started_at.map(|start| timestamp.saturating_sub(start))
    }

    /// Window length
    pub fn duration(&self) -> Duration {
        self.duration
    }
}
