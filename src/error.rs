//! Error type for the gaze-fusion library

use thiserror::Error;

use crate::types::Entity;

/// Errors surfaced at the boundary of the fusion engine
///
/// Per-sample numeric processing never fails: zero rates, timestamp gaps and
/// sustained sensor disagreement are absorbed by the engine. These errors are
/// reserved for invalid input handed over by the host, misconfiguration and
/// worker lifecycle problems.
#[derive(Debug, Error)]
pub enum FusionError {
    /// A quaternion with zero or non-finite norm was supplied
    #[error("Degenerate quaternion: norm {0} cannot be normalized")]
    DegenerateQuaternion(f32),

    /// A rotation-vector payload had the wrong number of components
    #[error("Rotation vector must have 3 to 5 components, got {0}")]
    InvalidRotationVector(usize),

    /// Axis remapping was asked to map two device axes onto the same axis
    #[error("Invalid axis remap: {0}")]
    InvalidRemap(String),

    /// Angles were requested before a calibration reference was set
    #[error("{0} has no calibration reference yet")]
    NotCalibrated(Entity),

    /// Settings failed validation
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A bounded work queue was full and the request could not be dropped
    #[error("Work queue is full")]
    QueueFull,

    /// The worker thread behind a handle has stopped
    #[error("Worker has stopped")]
    Disconnected,

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read, or a worker thread could not be spawned
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for FusionError {
    fn from(err: toml::de::Error) -> Self {
        FusionError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for FusionError {
    fn from(err: toml::ser::Error) -> Self {
        FusionError::Config(err.to_string())
    }
}

impl<T> From<crossbeam_channel::TrySendError<T>> for FusionError {
    fn from(err: crossbeam_channel::TrySendError<T>) -> Self {
        match err {
            crossbeam_channel::TrySendError::Full(_) => FusionError::QueueFull,
            crossbeam_channel::TrySendError::Disconnected(_) => FusionError::Disconnected,
        }
    }
}

/// Result type for fusion operations
pub type Result<T> = std::result::Result<T, FusionError>;
