//! Gaze and finger angle derivation
//!
//! A [`Deriver`] turns absolute orientations into (pitch, yaw) angles relative
//! to a calibration reference. A [`DerivationWorker`] runs one deriver on its
//! own thread and publishes results through a [`Mailbox`] that only accepts
//! newer results, so a slow computation can never overwrite a fresher one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use nalgebra::UnitQuaternion;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{FusionError, Result};
use crate::math::{QuaternionExt, RAD_TO_DEG, inverse};
use crate::remap::device_pitch;
use crate::types::{AnglePair, DerivationSettings, Entity, Event, PitchSource};

/// Angle derivation unit for one tracked entity
///
/// # Example
/// ```
/// use nalgebra::UnitQuaternion;
/// use gaze_fusion::{Deriver, Entity};
///
/// let mut gaze = Deriver::new(Entity::Gaze);
/// gaze.calibrate(UnitQuaternion::identity());
///
/// let turned = UnitQuaternion::from_euler_angles(0.0, 0.0, 30f32.to_radians());
/// let angles = gaze.update(turned).unwrap();
/// assert!((angles.yaw - 30.0).abs() < 1e-3);
/// assert!(angles.pitch.abs() < 1e-3);
/// ```
#[derive(Debug, Clone)]
pub struct Deriver {
    entity: Entity,
    settings: DerivationSettings,
    calibration: Option<UnitQuaternion<f32>>,
    orientation: Option<UnitQuaternion<f32>>,
    angles: Option<AnglePair>,
}

impl Deriver {
    /// Create a deriver with the default settings for `entity`
    pub fn new(entity: Entity) -> Self {
        let settings = match entity {
            Entity::Gaze => DerivationSettings::gaze(),
            Entity::Finger => DerivationSettings::finger(),
        };
        Self {
            entity,
            settings,
            calibration: None,
            orientation: None,
            angles: None,
        }
    }

    /// Create a deriver with specified settings
    pub fn with_settings(entity: Entity, settings: DerivationSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            ..Self::new(entity)
        })
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn settings(&self) -> DerivationSettings {
        self.settings
    }

    /// Set the zero reference
    ///
    /// If a sample arrived before any reference was set, its angles are derived
    /// now and returned.
    pub fn calibrate(&mut self, reference: UnitQuaternion<f32>) -> Option<AnglePair> {
        self.calibration = Some(reference);
        trace!(entity = %self.entity, ?reference, "Calibration reference set");

        match (self.orientation, self.angles) {
            (Some(orientation), None) => self.derive(orientation),
            _ => None,
        }
    }

    /// Store a new orientation and derive its angles
    ///
    /// Returns `None` while no reference is set; the sample is kept and derived
    /// once [`Deriver::calibrate`] is called.
    pub fn update(&mut self, orientation: UnitQuaternion<f32>) -> Option<AnglePair> {
        self.orientation = Some(orientation);
        if self.calibration.is_none() {
            self.angles = None;
            return None;
        }
        self.derive(orientation)
    }

    /// Latest orientation sample
    pub fn orientation(&self) -> Option<UnitQuaternion<f32>> {
        self.orientation
    }

    /// Current zero reference
    pub fn calibration(&self) -> Option<UnitQuaternion<f32>> {
        self.calibration
    }

    /// Latest derived angles
    ///
    /// Zero when calibrated but no sample has arrived yet.
    pub fn angles(&self) -> Result<AnglePair> {
        if self.calibration.is_none() {
            return Err(FusionError::NotCalibrated(self.entity));
        }
        Ok(self.angles.unwrap_or_default())
    }

    fn derive(&mut self, orientation: UnitQuaternion<f32>) -> Option<AnglePair> {
        let reference = self.calibration?;
        match relative_angles(&orientation, &reference, &self.settings) {
            Ok(angles) => {
                self.angles = Some(angles);
                Some(angles)
            }
            Err(err) => {
                warn!(entity = %self.entity, %err, "Angle derivation failed");
                None
            }
        }
    }
}

/// Pitch and yaw of `orientation` relative to `reference`, in degrees
pub fn relative_angles(
    orientation: &UnitQuaternion<f32>,
    reference: &UnitQuaternion<f32>,
    settings: &DerivationSettings,
) -> Result<AnglePair> {
    let delta = orientation * inverse(reference);

    let pitch = match settings.pitch_source {
        PitchSource::DeviceFrame => {
            device_pitch(orientation, settings.frame)? - device_pitch(reference, settings.frame)?
        }
        PitchSource::Euler => delta.pitch(),
    };
    let yaw = if settings.invert_yaw {
        -delta.yaw()
    } else {
        delta.yaw()
    };

    Ok(AnglePair {
        pitch: pitch * RAD_TO_DEG,
        yaw: yaw * RAD_TO_DEG,
    })
}

/// Single-slot last-value store with a monotonic sequence guard
#[derive(Debug, Default)]
pub struct Mailbox<T> {
    slot: Mutex<Option<(u64, T)>>,
}

impl<T: Copy> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Store `value` if `seq` is newer than the stored one
    ///
    /// Returns whether the value was accepted.
    pub fn publish(&self, seq: u64, value: T) -> bool {
        let mut slot = self.slot.lock();
        match *slot {
            Some((current, _)) if seq <= current => false,
            _ => {
                *slot = Some((seq, value));
                true
            }
        }
    }

    pub fn latest(&self) -> Option<T> {
        self.slot.lock().as_ref().map(|(_, value)| *value)
    }

    pub fn sequence(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|(seq, _)| *seq)
    }
}

#[derive(Debug, Clone, Copy)]
enum Job {
    /// Wake-up for a reference waiting in the calibration slot
    Calibrate,
    Update {
        seq: u64,
        orientation: UnitQuaternion<f32>,
    },
}

/// Reference waiting to be applied by the worker
#[derive(Debug, Clone, Copy)]
struct PendingCalibration {
    reference: UnitQuaternion<f32>,
    /// A matching [`Job::Calibrate`] sits in the queue
    queued: bool,
}

type CalibrationSlot = Mutex<Option<PendingCalibration>>;

/// Cloneable submission side of a [`DerivationWorker`]
#[derive(Debug, Clone)]
pub struct DerivationHandle {
    entity: Entity,
    jobs: Sender<Job>,
    pending: Arc<CalibrationSlot>,
    next_seq: Arc<AtomicU64>,
}

impl DerivationHandle {
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Hand a new zero reference to the worker
    ///
    /// The reference is never dropped. When the job queue is full it is
    /// applied right after the next queued job instead of in queue order. A
    /// later reference replaces one that has not been applied yet.
    ///
    /// # Errors
    /// `Disconnected` once the worker has stopped.
    pub fn calibrate(&self, reference: UnitQuaternion<f32>) -> Result<()> {
        let mut slot = self.pending.lock();
        *slot = Some(PendingCalibration {
            reference,
            queued: true,
        });
        match self.jobs.try_send(Job::Calibrate) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                if let Some(pending) = slot.as_mut() {
                    pending.queued = false;
                }
                debug!(
                    entity = %self.entity,
                    "Derivation queue full, calibration applied after the next job"
                );
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                slot.take();
                warn!(entity = %self.entity, "Calibration could not be delivered");
                Err(FusionError::Disconnected)
            }
        }
    }

    /// Queue a new orientation sample
    ///
    /// A full queue drops the sample.
    pub fn update(&self, orientation: UnitQuaternion<f32>) -> Result<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        match self.jobs.try_send(Job::Update { seq, orientation }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!(entity = %self.entity, seq, "Derivation queue full, sample dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(FusionError::Disconnected),
        }
    }
}

/// Deriver running on a dedicated thread
///
/// Submission never blocks. Each accepted result is stored in the mailbox and
/// emitted as [`Event::GazeOrientationUpdated`] or
/// [`Event::FingerOrientationUpdated`].
#[derive(Debug)]
pub struct DerivationWorker {
    entity: Entity,
    submit: Option<DerivationHandle>,
    mailbox: Arc<Mailbox<AnglePair>>,
    calibrated: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DerivationWorker {
    /// Spawn a worker with a job queue of `capacity` entries
    pub fn spawn(
        entity: Entity,
        settings: DerivationSettings,
        capacity: usize,
        events: Sender<Event>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(FusionError::InvalidSettings(
                "job queue capacity must be positive".into(),
            ));
        }
        let deriver = Deriver::with_settings(entity, settings)?;
        let (jobs, queue) = bounded(capacity);
        let pending: Arc<CalibrationSlot> = Arc::new(Mutex::new(None));
        let mailbox = Arc::new(Mailbox::new());
        let calibrated = Arc::new(AtomicBool::new(false));

        let worker_pending = Arc::clone(&pending);
        let worker_mailbox = Arc::clone(&mailbox);
        let worker_calibrated = Arc::clone(&calibrated);
        let thread = thread::Builder::new()
            .name(format!("{entity}-derivation"))
            .spawn(move || {
                let mut worker = Worker {
                    deriver,
                    pending: worker_pending,
                    mailbox: worker_mailbox,
                    calibrated: worker_calibrated,
                    events,
                    last_seq: 0,
                };
                worker.run(queue);
            })?;

        info!(%entity, capacity, "Derivation worker started");
        Ok(Self {
            entity,
            submit: Some(DerivationHandle {
                entity,
                jobs,
                pending,
                next_seq: Arc::new(AtomicU64::new(0)),
            }),
            mailbox,
            calibrated,
            thread: Some(thread),
        })
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Submission handle that can be moved to other threads
    pub fn handle(&self) -> Result<DerivationHandle> {
        self.submit.clone().ok_or(FusionError::Disconnected)
    }

    /// Hand a new zero reference to the worker
    pub fn calibrate(&self, reference: UnitQuaternion<f32>) -> Result<()> {
        self.submit
            .as_ref()
            .ok_or(FusionError::Disconnected)?
            .calibrate(reference)
    }

    /// Queue a new orientation sample
    pub fn update(&self, orientation: UnitQuaternion<f32>) -> Result<()> {
        self.submit
            .as_ref()
            .ok_or(FusionError::Disconnected)?
            .update(orientation)
    }

    /// Latest published angles
    pub fn angles(&self) -> Result<AnglePair> {
        match self.mailbox.latest() {
            Some(angles) => Ok(angles),
            None if self.calibrated.load(Ordering::Acquire) => Ok(AnglePair::default()),
            None => Err(FusionError::NotCalibrated(self.entity)),
        }
    }

    /// Close the queue and wait for the thread to finish pending jobs
    ///
    /// Blocks until every [`DerivationHandle`] obtained from this worker has
    /// been dropped.
    pub fn stop(&mut self) {
        self.submit.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(entity = %self.entity, "Derivation thread panicked");
            } else {
                info!(entity = %self.entity, "Derivation worker stopped");
            }
        }
    }
}

impl Drop for DerivationWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the worker thread
struct Worker {
    deriver: Deriver,
    pending: Arc<CalibrationSlot>,
    mailbox: Arc<Mailbox<AnglePair>>,
    calibrated: Arc<AtomicBool>,
    events: Sender<Event>,
    // Sequence of the last sample handed to the deriver
    last_seq: u64,
}

impl Worker {
    fn run(&mut self, queue: Receiver<Job>) {
        for job in queue.iter() {
            match job {
                Job::Calibrate => self.apply_calibration(true),
                Job::Update { seq, orientation } => {
                    self.last_seq = seq;
                    if let Some(angles) = self.deriver.update(orientation) {
                        self.publish(seq, angles);
                    }
                    // A reference that did not fit in the queue
                    self.apply_calibration(false);
                }
            }
        }
        self.apply_calibration(true);
    }

    /// Apply the reference in the slot
    ///
    /// With `include_queued` false only a reference without a queued wake-up
    /// is taken, so queued references keep their place in the job order.
    fn apply_calibration(&mut self, include_queued: bool) {
        let reference = {
            let mut slot = self.pending.lock();
            match *slot {
                Some(pending) if include_queued || !pending.queued => {
                    slot.take();
                    pending.reference
                }
                _ => return,
            }
        };

        let angles = self.deriver.calibrate(reference);
        self.calibrated.store(true, Ordering::Release);
        if let Some(angles) = angles {
            self.publish(self.last_seq, angles);
        }
    }

    fn publish(&self, seq: u64, angles: AnglePair) {
        let entity = self.deriver.entity();
        if !self.mailbox.publish(seq, angles) {
            debug!(%entity, seq, "Stale derivation result dropped");
            return;
        }
        let event = match entity {
            Entity::Gaze => Event::GazeOrientationUpdated(angles),
            Entity::Finger => Event::FingerOrientationUpdated(angles),
        };
        if self.events.send(event).is_err() {
            trace!(%entity, "Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remap::{Axis, DeviceFrame};
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    const EPSILON: f32 = 1e-3;

    fn yawed(degrees: f32) -> UnitQuaternion<f32> {
        UnitQuaternion::from_euler_degrees(0.0, 0.0, degrees)
    }

    #[test]
    fn test_gaze_and_finger_yaw() {
        let mut gaze = Deriver::new(Entity::Gaze);
        let mut finger = Deriver::new(Entity::Finger);
        gaze.calibrate(UnitQuaternion::identity());
        finger.calibrate(UnitQuaternion::identity());

        let gaze_angles = gaze.update(yawed(30.0)).unwrap();
        let finger_angles = finger.update(yawed(30.0)).unwrap();

        assert!((gaze_angles.yaw - 30.0).abs() < EPSILON);
        assert!((finger_angles.yaw + 30.0).abs() < EPSILON);
        assert!(gaze_angles.pitch.abs() < EPSILON);
        assert!(finger_angles.pitch.abs() < EPSILON);
    }

    #[test]
    fn test_identity_against_identity() {
        let mut gaze = Deriver::new(Entity::Gaze);
        gaze.calibrate(UnitQuaternion::identity());
        let angles = gaze.update(UnitQuaternion::identity()).unwrap();
        assert!(angles.pitch.abs() < EPSILON);
        assert!(angles.yaw.abs() < EPSILON);
    }

    #[test]
    fn test_device_frame_pitch() {
        let mut gaze = Deriver::new(Entity::Gaze);
        // Upright, looking at the horizon
        gaze.calibrate(UnitQuaternion::from_euler_degrees(90.0, 0.0, 0.0));

        let up = gaze
            .update(UnitQuaternion::from_euler_degrees(110.0, 0.0, 0.0))
            .unwrap();
        assert!((up.pitch - 20.0).abs() < 1e-2, "pitch: {}", up.pitch);

        let down = gaze
            .update(UnitQuaternion::from_euler_degrees(75.0, 0.0, 0.0))
            .unwrap();
        assert!((down.pitch + 15.0).abs() < 1e-2, "pitch: {}", down.pitch);
    }

    #[test]
    fn test_euler_pitch_source() {
        let settings = DerivationSettings {
            pitch_source: PitchSource::Euler,
            ..DerivationSettings::finger()
        };
        let mut finger = Deriver::with_settings(Entity::Finger, settings).unwrap();
        finger.calibrate(UnitQuaternion::identity());

        let angles = finger
            .update(UnitQuaternion::from_euler_degrees(0.0, 25.0, 0.0))
            .unwrap();
        assert!((angles.pitch - 25.0).abs() < EPSILON);
        assert!(angles.yaw.abs() < EPSILON);
    }

    #[test]
    fn test_update_before_calibration_is_deferred() {
        let mut gaze = Deriver::new(Entity::Gaze);

        assert_eq!(gaze.update(yawed(30.0)), None);
        assert!(matches!(
            gaze.angles(),
            Err(FusionError::NotCalibrated(Entity::Gaze))
        ));
        assert_eq!(gaze.orientation(), Some(yawed(30.0)));

        let angles = gaze.calibrate(UnitQuaternion::identity()).unwrap();
        assert!((angles.yaw - 30.0).abs() < EPSILON);
        assert_eq!(gaze.angles().unwrap(), angles);
    }

    #[test]
    fn test_recalibration_keeps_last_angles() {
        let mut gaze = Deriver::new(Entity::Gaze);
        gaze.calibrate(UnitQuaternion::identity());
        let before = gaze.update(yawed(30.0)).unwrap();

        assert_eq!(gaze.calibrate(yawed(30.0)), None);
        assert_eq!(gaze.calibration(), Some(yawed(30.0)));
        assert_eq!(gaze.angles().unwrap(), before);

        let after = gaze.update(yawed(30.0)).unwrap();
        assert!(after.yaw.abs() < EPSILON);
    }

    #[test]
    fn test_calibrated_without_sample() {
        let mut finger = Deriver::new(Entity::Finger);
        assert_eq!(finger.calibrate(UnitQuaternion::identity()), None);
        assert_eq!(finger.angles().unwrap(), AnglePair::default());
    }

    #[test]
    fn test_invalid_frame_rejected() {
        let settings = DerivationSettings {
            frame: DeviceFrame {
                x: Axis::Y,
                y: Axis::MinusY,
            },
            ..DerivationSettings::gaze()
        };
        assert!(matches!(
            Deriver::with_settings(Entity::Gaze, settings),
            Err(FusionError::InvalidRemap(_))
        ));
    }

    #[test]
    fn test_mailbox_rejects_stale() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.latest(), None);

        assert!(mailbox.publish(2, 20));
        assert!(!mailbox.publish(1, 10));
        assert!(!mailbox.publish(2, 99));
        assert_eq!(mailbox.latest(), Some(20));

        assert!(mailbox.publish(5, 50));
        assert_eq!(mailbox.latest(), Some(50));
        assert_eq!(mailbox.sequence(), Some(5));
    }

    #[test]
    fn test_worker_publishes_events() {
        let (events, received) = unbounded::<Event>();
        let mut worker =
            DerivationWorker::spawn(Entity::Finger, DerivationSettings::finger(), 16, events)
                .unwrap();

        assert!(matches!(
            worker.angles(),
            Err(FusionError::NotCalibrated(Entity::Finger))
        ));

        worker.calibrate(UnitQuaternion::identity()).unwrap();
        worker.update(yawed(30.0)).unwrap();

        let event = received.recv_timeout(Duration::from_secs(5)).unwrap();
        match event {
            Event::FingerOrientationUpdated(angles) => {
                assert!((angles.yaw + 30.0).abs() < EPSILON);
            }
            other => panic!("unexpected event {other:?}"),
        }

        worker.stop();
        assert!((worker.angles().unwrap().yaw + 30.0).abs() < EPSILON);
        assert!(matches!(
            worker.update(yawed(10.0)),
            Err(FusionError::Disconnected)
        ));
    }

    #[test]
    fn test_worker_deferred_update() {
        let (events, received) = unbounded::<Event>();
        let mut worker =
            DerivationWorker::spawn(Entity::Gaze, DerivationSettings::gaze(), 16, events).unwrap();

        worker.update(yawed(-45.0)).unwrap();
        worker.calibrate(UnitQuaternion::identity()).unwrap();
        worker.stop();

        let events: Vec<Event> = received.try_iter().collect();
        assert_eq!(events.len(), 1);
        match events[0] {
            Event::GazeOrientationUpdated(angles) => {
                assert!((angles.yaw + 45.0).abs() < EPSILON);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_worker_calibration_survives_full_queue() {
        let (events, _received) = unbounded::<Event>();
        let mut worker =
            DerivationWorker::spawn(Entity::Gaze, DerivationSettings::gaze(), 1, events).unwrap();

        for step in 0..200 {
            if step == 50 {
                worker.calibrate(UnitQuaternion::identity()).unwrap();
            }
            worker.update(yawed(30.0)).unwrap();
        }
        worker.stop();

        let angles = worker.angles().unwrap();
        assert!((angles.yaw - 30.0).abs() < EPSILON, "yaw: {}", angles.yaw);
        assert!(matches!(
            worker.calibrate(UnitQuaternion::identity()),
            Err(FusionError::Disconnected)
        ));
    }

    #[test]
    fn test_worker_zero_capacity_rejected() {
        let (events, _received) = unbounded::<Event>();
        assert!(matches!(
            DerivationWorker::spawn(Entity::Gaze, DerivationSettings::gaze(), 0, events),
            Err(FusionError::InvalidSettings(_))
        ));
    }
}
