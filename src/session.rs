//! Tracking session: the boundary between sensor hosts and UI consumers
//!
//! A session owns one [`Tracker`] and one [`DerivationWorker`] per entity.
//! Fused orientations and the gaze calibration reference are routed from the
//! tracker thread straight into the gaze worker; every event, routed or not,
//! is forwarded to the session's outbound channel.

use core::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::derivation::{DerivationHandle, DerivationWorker};
use crate::error::Result;
use crate::fusion::EventSink;
use crate::math::{checked_unit, from_rotation_vector};
use crate::tracker::{Tracker, TrackerStatus};
use crate::types::{AbsoluteSample, AnglePair, Entity, Event, GyroscopeSample};

/// Event sink on the tracker thread feeding the gaze worker
struct GazeRouter {
    events: Sender<Event>,
    gaze: DerivationHandle,
}

impl EventSink for GazeRouter {
    fn emit(&mut self, event: Event) {
        if self.events.send(event).is_err() {
            trace!(?event, "Session event receiver dropped");
        }
        match event {
            Event::CalibrationFinished(reference) => {
                if let Err(err) = self.gaze.calibrate(reference) {
                    warn!(%err, "Gaze calibration lost");
                }
            }
            Event::OrientationUpdated(orientation) => {
                if let Err(err) = self.gaze.update(orientation) {
                    debug!(%err, "Gaze update not delivered");
                }
            }
            _ => {}
        }
    }
}

/// Gaze and finger tracking session
///
/// # Example
/// ```
/// use std::time::Duration;
/// use nalgebra::{Quaternion, Vector3};
/// use gaze_fusion::{Event, Session};
///
/// let mut session = Session::new().unwrap();
/// let events = session.events();
///
/// session
///     .on_absolute_orientation_sample(Quaternion::identity(), Duration::ZERO)
///     .unwrap();
/// session
///     .on_gyroscope_sample(Vector3::zeros(), Duration::from_millis(10))
///     .unwrap();
/// session.stop();
///
/// assert_eq!(events.try_recv(), Ok(Event::CalibrationStarted));
/// assert!(session.gaze_angles().is_err());
/// ```
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    tracker: Tracker,
    gaze: DerivationWorker,
    finger: DerivationWorker,
    events: Receiver<Event>,
}

impl Session {
    /// Start a session with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(SessionConfig::default())
    }

    /// Start a session
    pub fn with_config(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (sender, events) = unbounded();

        let gaze = DerivationWorker::spawn(
            Entity::Gaze,
            config.gaze,
            config.job_capacity,
            sender.clone(),
        )?;
        let finger = DerivationWorker::spawn(
            Entity::Finger,
            config.finger,
            config.job_capacity,
            sender.clone(),
        )?;
        let router = GazeRouter {
            events: sender,
            gaze: gaze.handle()?,
        };
        let tracker = Tracker::spawn(config.fusion, config.queue_capacity, router)?;

        info!(
            queue_capacity = config.queue_capacity,
            job_capacity = config.job_capacity,
            calibration_period = config.fusion.calibration_period,
            "Session started"
        );
        Ok(Self {
            config,
            tracker,
            gaze,
            finger,
            events,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Receiver for the outbound events
    ///
    /// Receivers are clones of one queue: each event goes to exactly one of
    /// them.
    pub fn events(&self) -> Receiver<Event> {
        self.events.clone()
    }

    /// Absolute-orientation sample from the rotation-vector sensor
    pub fn on_absolute_orientation_sample(
        &self,
        orientation: Quaternion<f32>,
        timestamp: Duration,
    ) -> Result<()> {
        self.tracker.on_absolute(AbsoluteSample {
            orientation: checked_unit(orientation)?,
            timestamp,
        })
    }

    /// Raw rotation-vector payload (`[x, y, z]`, optionally followed by `w`
    /// and an accuracy estimate)
    pub fn on_rotation_vector(&self, values: &[f32], timestamp: Duration) -> Result<()> {
        self.tracker.on_absolute(AbsoluteSample {
            orientation: from_rotation_vector(values)?,
            timestamp,
        })
    }

    /// Angular-rate sample from the gyroscope, in rad/s
    pub fn on_gyroscope_sample(&self, angular_rate: Vector3<f32>, timestamp: Duration) -> Result<()> {
        self.tracker.on_gyroscope(GyroscopeSample {
            angular_rate,
            timestamp,
        })
    }

    /// Set the finger zero reference
    pub fn set_finger_calibration(&self, reference: Quaternion<f32>) -> Result<()> {
        self.finger.calibrate(checked_unit(reference)?)
    }

    /// Feed a gaze orientation directly to the gaze derivation unit
    pub fn set_gaze_orientation(&self, orientation: Quaternion<f32>) -> Result<()> {
        self.gaze.update(checked_unit(orientation)?)
    }

    /// Feed a finger orientation to the finger derivation unit
    pub fn set_finger_orientation(&self, orientation: Quaternion<f32>) -> Result<()> {
        self.finger.update(checked_unit(orientation)?)
    }

    /// Restart fusion and gaze calibration from the next absolute sample
    pub fn recalibrate(&self) -> Result<()> {
        info!("Recalibration requested");
        self.tracker.reset()
    }

    /// Latest gaze angles
    pub fn gaze_angles(&self) -> Result<AnglePair> {
        self.gaze.angles()
    }

    /// Latest finger angles
    pub fn finger_angles(&self) -> Result<AnglePair> {
        self.finger.angles()
    }

    /// Fusion engine state as of the last processed sample
    pub fn status(&self) -> TrackerStatus {
        self.tracker.status()
    }

    /// Latest fused head orientation
    pub fn orientation(&self) -> UnitQuaternion<f32> {
        self.tracker.status().orientation
    }

    /// Drain every queue and join all threads
    ///
    /// Inbound calls fail with `Disconnected` afterwards; angle queries keep
    /// returning the last values.
    pub fn stop(&mut self) {
        // The tracker holds a gaze handle, so it has to go first
        self.tracker.stop();
        self.gaze.stop();
        self.finger.stop();
        info!("Session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
