//! Complementary fusion engine for the gaze-fusion library

use core::time::Duration;

use crossbeam_channel::Sender;
use nalgebra::UnitQuaternion;
use tracing::{debug, info, trace, warn};

use crate::calibration::{CalibrationTransition, CalibrationWindow};
use crate::math::{compose, dot, from_angular_rate, slerp};
use crate::types::{
    AbsoluteSample, CalibrationPhase, Event, FusionFlags, FusionInternalStates, FusionSettings,
    GyroscopeSample,
};

/// Receiver of the events produced by the fusion engine
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

impl EventSink for Sender<Event> {
    fn emit(&mut self, event: Event) {
        if self.send(event).is_err() {
            trace!(?event, "Event receiver dropped");
        }
    }
}

/// Complementary fusion engine
///
/// Fuses a gyroscope stream with an absolute-orientation (rotation vector)
/// stream. The gyroscope is integrated for moment-to-moment motion and the
/// absolute estimate pulls it back slowly to cancel drift. Absolute samples
/// that disagree too much with the integrated orientation are ignored for that
/// frame; sustained severe disagreement means the integration itself has gone
/// wrong and triggers a hard reset that re-seeds the filter.
///
/// The engine also drives the calibration window: the first absolute sample
/// opens it and the fused orientation at the moment it closes is the zero
/// reference for the wearer's gaze.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use nalgebra::{UnitQuaternion, Vector3};
/// use gaze_fusion::{AbsoluteSample, CalibrationPhase, Event, Fusion, GyroscopeSample};
///
/// let mut fusion = Fusion::new();
/// let mut events: Vec<Event> = Vec::new();
///
/// fusion.update_absolute(
///     &AbsoluteSample { orientation: UnitQuaternion::identity(), timestamp: Duration::ZERO },
///     &mut events,
/// );
/// assert_eq!(fusion.phase(), CalibrationPhase::InProgress);
///
/// for step in 1..=10u64 {
///     let sample = GyroscopeSample {
///         angular_rate: Vector3::zeros(),
///         timestamp: Duration::from_millis(step * 10),
///     };
///     fusion.update_gyroscope(&sample, &mut events);
/// }
/// assert_eq!(events[0], Event::CalibrationStarted);
/// ```
#[derive(Debug, Clone)]
pub struct Fusion {
    /// Engine settings
    settings: FusionSettings,
    /// Current fused orientation
    fused: UnitQuaternion<f32>,
    /// Gyroscope-integrated orientation, corrected whenever the sensors agree
    gyroscope: UnitQuaternion<f32>,
    /// Latest absolute orientation estimate
    absolute: UnitQuaternion<f32>,
    /// Timestamp of the previous gyroscope sample
    last_gyroscope_timestamp: Option<Duration>,
    /// Consecutive frames of severe disagreement
    panic_counter: u32,
    /// Hard resets performed since creation
    panic_resets: u32,
    /// Whether a hard reset is being deferred by ongoing motion
    panic_reset_pending: bool,
    /// Dot product of the last processed gyroscope sample
    agreement: f32,
    /// Whether the last absolute estimate was rejected as an outlier
    absolute_rejected: bool,
    /// Angular velocity magnitude of the last gyroscope sample
    angular_velocity: f32,
    /// Calibration window
    window: CalibrationWindow,
}

impl Fusion {
    /// Create a new engine with default settings
    pub fn new() -> Self {
        Self::with_settings(FusionSettings::default())
    }

    /// Create a new engine with specified settings
    pub fn with_settings(settings: FusionSettings) -> Self {
        Self {
            settings,
            fused: UnitQuaternion::identity(),
            gyroscope: UnitQuaternion::identity(),
            absolute: UnitQuaternion::identity(),
            last_gyroscope_timestamp: None,
            panic_counter: 0,
            panic_resets: 0,
            panic_reset_pending: false,
            agreement: 1.0,
            absolute_rejected: false,
            angular_velocity: 0.0,
            window: Self::window_for(&settings),
        }
    }

    /// Reset the engine to its freshly created state
    ///
    /// Used when the tracker is restarted: the next absolute sample re-seeds
    /// the filter and opens a new calibration window.
    pub fn reset(&mut self) {
        *self = Self::with_settings(self.settings);
    }

    /// Update engine settings
    ///
    /// A new calibration period applies from the next calibration episode.
    pub fn set_settings(&mut self, settings: FusionSettings) {
        self.settings = settings;
        if self.window.phase() == CalibrationPhase::NotStarted {
            self.window = Self::window_for(&settings);
        }
    }

    /// Get current engine settings
    pub fn settings(&self) -> FusionSettings {
        self.settings
    }

    /// Process an absolute-orientation sample
    ///
    /// The sample becomes the current absolute estimate. If the engine is
    /// waiting to start, it also seeds the fused and integrated orientations
    /// and opens the calibration window.
    pub fn update_absolute(&mut self, sample: &AbsoluteSample, sink: &mut impl EventSink) {
        self.absolute = sample.orientation;

        if self.window.phase() != CalibrationPhase::NotStarted {
            return;
        }

        self.fused = sample.orientation;
        self.gyroscope = sample.orientation;
        self.last_gyroscope_timestamp = None;
        self.panic_counter = 0;
        self.panic_reset_pending = false;

        if let Some(CalibrationTransition::Started) = self.window.start(sample.timestamp) {
            info!(
                timestamp = ?sample.timestamp,
                period = self.settings.calibration_period,
                "Calibration started"
            );
            sink.emit(Event::CalibrationStarted);
        }
    }

    /// Process a gyroscope sample
    ///
    /// Ignored until an absolute sample has seeded the filter. The first
    /// sample after seeding only establishes the time base.
    pub fn update_gyroscope(&mut self, sample: &GyroscopeSample, sink: &mut impl EventSink) {
        if self.window.phase() == CalibrationPhase::NotStarted {
            trace!("Gyroscope sample before seeding, ignored");
            return;
        }

        let Some(previous) = self.last_gyroscope_timestamp.replace(sample.timestamp) else {
            trace!(timestamp = ?sample.timestamp, "First gyroscope sample, time base established");
            return;
        };
        let delta_time = match sample.timestamp.checked_sub(previous) {
            Some(elapsed) if !elapsed.is_zero() => elapsed.as_secs_f32(),
            _ => {
                debug!(
                    previous = ?previous,
                    timestamp = ?sample.timestamp,
                    "Non-increasing gyroscope timestamp, sample dropped"
                );
                self.last_gyroscope_timestamp = Some(previous.max(sample.timestamp));
                return;
            }
        };

        // Dead reckoning
        let speed = sample.angular_rate.norm();
        self.angular_velocity = if speed.is_finite() { speed } else { 0.0 };
        let rotation =
            from_angular_rate(&sample.angular_rate, delta_time, self.settings.noise_threshold);
        self.gyroscope = compose(&rotation, &self.gyroscope);

        self.fuse();

        if self.panic_counter > self.settings.panic_threshold {
            if self.angular_velocity < self.settings.settling_velocity {
                warn!(
                    panic_counter = self.panic_counter,
                    angular_velocity = self.angular_velocity,
                    "Sustained sensor disagreement, resetting to absolute orientation"
                );
                self.panic_reset();
                // Nothing to publish until the next absolute sample re-seeds
                return;
            } else if !self.panic_reset_pending {
                debug!(
                    angular_velocity = self.angular_velocity,
                    settling_velocity = self.settings.settling_velocity,
                    "Panic reset deferred while the device is moving"
                );
                self.panic_reset_pending = true;
            }
        }

        self.publish(sample.timestamp, sink);
    }

    /// Get current fused orientation
    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        self.fused
    }

    /// Get the gyroscope-integrated orientation
    pub fn gyroscope_quaternion(&self) -> UnitQuaternion<f32> {
        self.gyroscope
    }

    /// Get the latest absolute orientation estimate
    pub fn absolute_quaternion(&self) -> UnitQuaternion<f32> {
        self.absolute
    }

    /// Get current calibration phase
    pub fn phase(&self) -> CalibrationPhase {
        self.window.phase()
    }

    /// Get internal engine states
    pub fn internal_states(&self) -> FusionInternalStates {
        FusionInternalStates {
            agreement: self.agreement,
            absolute_rejected: self.absolute_rejected,
            panic_counter: self.panic_counter,
            panic_resets: self.panic_resets,
            angular_velocity: self.angular_velocity,
        }
    }

    /// Get engine flags
    pub fn flags(&self) -> FusionFlags {
        FusionFlags {
            calibrating: matches!(
                self.window.phase(),
                CalibrationPhase::InProgress | CalibrationPhase::NearlyDone
            ),
            panic_reset_pending: self.panic_reset_pending,
        }
    }

    /// Private helper methods

    fn window_for(settings: &FusionSettings) -> CalibrationWindow {
        CalibrationWindow::new(settings.calibration_duration(), settings.nearly_done_fraction)
    }

    /// Cross-check the integrated orientation against the absolute estimate
    fn fuse(&mut self) {
        self.agreement = dot(&self.gyroscope, &self.absolute);
        let closeness = self.agreement.abs();

        if closeness < self.settings.outlier_threshold {
            // Absolute sensor jumped; trust the gyroscope alone this frame
            if closeness < self.settings.outlier_panic_threshold {
                self.panic_counter = self.panic_counter.saturating_add(1);
            }
            self.absolute_rejected = true;
            self.fused = self.gyroscope;
        } else {
            let corrected = slerp(
                &self.gyroscope,
                &self.absolute,
                self.settings.interpolation_weight,
            );
            self.absolute_rejected = false;
            self.fused = corrected;
            self.gyroscope = corrected;
            self.panic_counter = 0;
            self.panic_reset_pending = false;
        }
    }

    /// Return to `NotStarted` so the next absolute sample re-seeds the filter
    fn panic_reset(&mut self) {
        self.window = Self::window_for(&self.settings);
        self.last_gyroscope_timestamp = None;
        self.panic_counter = 0;
        self.panic_reset_pending = false;
        self.panic_resets = self.panic_resets.saturating_add(1);
    }

    /// Emit calibration transitions, then the fused orientation
    fn publish(&mut self, timestamp: Duration, sink: &mut impl EventSink) {
        while let Some(transition) = self.window.advance(timestamp) {
            match transition {
                CalibrationTransition::AboutToFinish => {
                    info!(timestamp = ?timestamp, "Calibration about to finish");
                    sink.emit(Event::CalibrationAboutToFinish);
                }
                CalibrationTransition::Finished => {
                    info!(timestamp = ?timestamp, reference = ?self.fused, "Calibration finished");
                    sink.emit(Event::CalibrationFinished(self.fused));
                }
                CalibrationTransition::Started => {}
            }
        }
        sink.emit(Event::OrientationUpdated(self.fused));
    }
}

impl Default for Fusion {
    fn default() -> Self {
        Self::new()
    }
}
