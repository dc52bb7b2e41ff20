//! Gaze Fusion - orientation fusion and calibration for head and hand tracked pointers
//!
//! This library turns two disagreeing inertial streams, a drift-prone
//! gyroscope and a jump-prone rotation-vector sensor, into one stable
//! orientation. It runs a timed calibration that captures the wearer's zero
//! reference and derives the pitch and yaw angles (in degrees) that drive a
//! viewport (the head, "gaze") and a cursor (the hand, "finger").
//!
//! # Features
//!
//! - Complementary filter with an outlier gate against rotation-vector jumps
//! - Panic reset with re-seeding after sustained sensor disagreement
//! - Timed calibration window with "about to finish" notification
//! - Device-frame pitch via rotation-matrix axis remapping
//! - Single-writer tracker thread and per-entity derivation workers
//! - TOML configuration of every threshold
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use nalgebra::{Quaternion, Vector3};
//! use gaze_fusion::{Event, Session, SessionConfig};
//!
//! let config = SessionConfig::from_toml_str("[fusion]\ncalibration_period = 1.0").unwrap();
//! let mut session = Session::with_config(config).unwrap();
//! let events = session.events();
//!
//! // Rotation-vector sensor seeds the filter and starts calibration
//! session
//!     .on_absolute_orientation_sample(Quaternion::identity(), Duration::ZERO)
//!     .unwrap();
//!
//! // 100 Hz gyroscope, device held still
//! for step in 0..=150u64 {
//!     session
//!         .on_gyroscope_sample(Vector3::zeros(), Duration::from_millis(step * 10))
//!         .unwrap();
//! }
//! session.stop();
//!
//! let finished = events
//!     .try_iter()
//!     .any(|event| matches!(event, Event::CalibrationFinished(_)));
//! assert!(finished);
//!
//! let angles = session.gaze_angles().unwrap();
//! assert!(angles.pitch.abs() < 1e-3 && angles.yaw.abs() < 1e-3);
//! ```

pub mod calibration;
mod config;
pub mod derivation;
mod error;
mod fusion;
pub mod math;
pub mod remap;
mod session;
mod tracker;
mod types;

// Re-export all public types and functions
pub use config::SessionConfig;
pub use derivation::{DerivationHandle, DerivationWorker, Deriver, Mailbox};
pub use error::{FusionError, Result};
pub use fusion::{EventSink, Fusion};
pub use math::{DEG_TO_RAD, QuaternionExt, RAD_TO_DEG, Vector3Ext};
pub use remap::{Axis, DeviceFrame};
pub use session::Session;
pub use tracker::{Tracker, TrackerInput, TrackerStatus};
pub use types::*;
