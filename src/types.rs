//! Core types and conventions for the gaze-fusion library

use core::fmt;
use core::time::Duration;

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::remap::DeviceFrame;

/// Tracked entity
///
/// The head-worn sensor array drives the gaze; the hand-worn input device
/// drives the finger. The two are fully independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// Head orientation, used to scroll the viewport
    Gaze,
    /// Hand orientation, used to move the cursor
    Finger,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Gaze => f.write_str("gaze"),
            Entity::Finger => f.write_str("finger"),
        }
    }
}

/// Calibration phase
///
/// Advances monotonically `NotStarted -> InProgress -> NearlyDone -> Done`.
/// Only a panic reset or an explicit tracker restart moves it back to
/// `NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub enum CalibrationPhase {
    /// Waiting for the first absolute-orientation sample
    #[default]
    NotStarted,
    /// Calibration window is running
    InProgress,
    /// At least the nearly-done fraction of the window has elapsed
    NearlyDone,
    /// The calibration reference has been captured
    Done,
}

/// Fusion engine settings
///
/// Every threshold here is empirical. The defaults are tuned for a phone-class
/// gyroscope (rad/s) sampled at 100 Hz or more and a rotation-vector sensor
/// at a lower rate.
///
/// # Example
/// ```
/// use gaze_fusion::FusionSettings;
///
/// let settings = FusionSettings {
///     interpolation_weight: 0.01,  // correct drift twice as fast
///     calibration_period: 10.0,    // shorter calibration window
///     ..Default::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// Angular velocity magnitude (rad/s) below which a gyroscope sample is noise
    ///
    /// The rotation axis is only normalized above this level; below it the
    /// sample contributes no rotation.
    pub noise_threshold: f32,
    /// Absolute dot product below which the absolute sample is treated as an outlier
    pub outlier_threshold: f32,
    /// Absolute dot product below which the panic counter is incremented
    ///
    /// Must be stricter (lower) than `outlier_threshold`.
    pub outlier_panic_threshold: f32,
    /// Slerp weight pulling the gyroscope estimate toward the absolute estimate
    ///
    /// 0 relies entirely on the gyroscope, 1 entirely on the absolute sensor.
    pub interpolation_weight: f32,
    /// Consecutive panic frames after which a hard reset is requested
    pub panic_threshold: u32,
    /// Angular velocity (rad/s) below which a requested hard reset is performed
    pub settling_velocity: f32,
    /// Calibration window length in seconds
    pub calibration_period: f32,
    /// Fraction of the calibration window after which "about to finish" fires
    pub nearly_done_fraction: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            noise_threshold: 0.1,
            outlier_threshold: 0.85,
            outlier_panic_threshold: 0.65,
            interpolation_weight: 0.005,
            panic_threshold: 60,
            settling_velocity: 3.0,
            calibration_period: 15.0,
            nearly_done_fraction: 0.8,
        }
    }
}

impl FusionSettings {
    /// Check that the thresholds are mutually consistent
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| v > 0.0 && v <= 1.0;

        if !in_unit(self.outlier_threshold) || !in_unit(self.outlier_panic_threshold) {
            return Err(FusionError::InvalidSettings(
                "outlier thresholds must be in (0, 1]".into(),
            ));
        }
        if self.outlier_panic_threshold > self.outlier_threshold {
            return Err(FusionError::InvalidSettings(format!(
                "outlier_panic_threshold {} exceeds outlier_threshold {}",
                self.outlier_panic_threshold, self.outlier_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.interpolation_weight) {
            return Err(FusionError::InvalidSettings(
                "interpolation_weight must be in [0, 1]".into(),
            ));
        }
        if self.noise_threshold < 0.0 || self.settling_velocity < 0.0 {
            return Err(FusionError::InvalidSettings(
                "velocity thresholds must not be negative".into(),
            ));
        }
        if !(self.calibration_period > 0.0 && self.calibration_period.is_finite()) {
            return Err(FusionError::InvalidSettings(
                "calibration_period must be a positive number of seconds".into(),
            ));
        }
        if !(self.nearly_done_fraction > 0.0 && self.nearly_done_fraction < 1.0) {
            return Err(FusionError::InvalidSettings(
                "nearly_done_fraction must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }

    /// Calibration window length
    ///
    /// Invalid periods collapse to zero, finishing calibration on the first
    /// gyroscope sample; call [`FusionSettings::validate`] to reject them.
    pub fn calibration_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.calibration_period).unwrap_or_default()
    }
}

/// How the pitch of a derivation unit is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchSource {
    /// Difference of the device-frame pitch of sample and reference
    #[default]
    DeviceFrame,
    /// Euler pitch of the delta rotation
    Euler,
}

/// Per-entity angle derivation settings
///
/// # Example
/// ```
/// use gaze_fusion::DerivationSettings;
///
/// let finger = DerivationSettings::finger();
/// assert!(finger.invert_yaw);
/// assert!(!DerivationSettings::gaze().invert_yaw);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationSettings {
    /// Negate the yaw
    ///
    /// The hand-worn device reports rotations with the opposite handedness, so
    /// the finger unit flips yaw to keep cursor motion consistent with the
    /// gaze.
    pub invert_yaw: bool,
    /// Pitch extraction method
    pub pitch_source: PitchSource,
    /// Device frame used by [`PitchSource::DeviceFrame`]
    pub frame: DeviceFrame,
}

impl Default for DerivationSettings {
    fn default() -> Self {
        Self::gaze()
    }
}

impl DerivationSettings {
    /// Defaults for the head-worn gaze unit
    pub fn gaze() -> Self {
        Self {
            invert_yaw: false,
            pitch_source: PitchSource::DeviceFrame,
            frame: DeviceFrame::default(),
        }
    }

    /// Defaults for the hand-worn finger unit
    pub fn finger() -> Self {
        Self {
            invert_yaw: true,
            ..Self::gaze()
        }
    }

    /// Check that the device frame names two distinct axes
    pub fn validate(&self) -> Result<()> {
        crate::remap::remap_coordinate_system(&Matrix3::identity(), self.frame.x, self.frame.y)
            .map(|_| ())
    }
}

/// Absolute-orientation sample (rotation-vector sensor)
///
/// Low rate, globally consistent, but prone to discontinuous jumps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteSample {
    /// Orientation in the sensor's East-North-Up world frame
    pub orientation: UnitQuaternion<f32>,
    /// Sensor timestamp since an arbitrary epoch
    pub timestamp: Duration,
}

/// Angular-rate sample (gyroscope)
///
/// High rate and smooth, but only relative and drifting when integrated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroscopeSample {
    /// Angular rate about the device axes in radians per second
    pub angular_rate: Vector3<f32>,
    /// Sensor timestamp since an arbitrary epoch
    pub timestamp: Duration,
}

/// Pitch and yaw in degrees relative to a calibration reference
///
/// Pitch > 0 means tilted toward the sky.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnglePair {
    pub pitch: f32,
    pub yaw: f32,
}

/// Outbound events
///
/// These are the only points of contact with the viewport, cursor and
/// transport layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// The first absolute sample seeded the filter and the window started
    CalibrationStarted,
    /// The nearly-done fraction of the calibration window has elapsed
    CalibrationAboutToFinish,
    /// The window closed; the payload is the new gaze zero reference
    CalibrationFinished(UnitQuaternion<f32>),
    /// A new fused head orientation
    OrientationUpdated(UnitQuaternion<f32>),
    /// Gaze angles relative to the gaze calibration reference
    GazeOrientationUpdated(AnglePair),
    /// Finger angles relative to the finger calibration reference
    FingerOrientationUpdated(AnglePair),
}

/// Fusion engine internal states
///
/// Diagnostic view of the last processed gyroscope sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionInternalStates {
    /// Dot product between the gyroscope and absolute estimates
    pub agreement: f32,
    /// Whether the absolute sample was rejected as an outlier
    pub absolute_rejected: bool,
    /// Consecutive frames of severe disagreement
    pub panic_counter: u32,
    /// Hard resets performed since the engine was created
    pub panic_resets: u32,
    /// Angular velocity magnitude in rad/s
    pub angular_velocity: f32,
}

/// Fusion engine flags
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionFlags {
    /// Whether the calibration window is running
    pub calibrating: bool,
    /// Whether a hard reset has been requested but deferred by ongoing motion
    pub panic_reset_pending: bool,
}
