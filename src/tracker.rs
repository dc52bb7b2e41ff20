//! Single-writer processing thread for the fusion engine
//!
//! Sensor callbacks arrive on arbitrary threads and at different rates. They
//! only enqueue; one dedicated thread owns the [`Fusion`] engine and applies
//! the samples in arrival order, so the engine state is never shared.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use nalgebra::UnitQuaternion;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{FusionError, Result};
use crate::fusion::{EventSink, Fusion};
use crate::types::{
    AbsoluteSample, CalibrationPhase, FusionInternalStates, FusionSettings, GyroscopeSample,
};

/// Input consumed by the tracker thread
#[derive(Debug, Clone, Copy)]
pub enum TrackerInput {
    Absolute(AbsoluteSample),
    Gyroscope(GyroscopeSample),
    /// Restart tracking and calibration from the next absolute sample
    Reset,
}

/// Engine state as of the last processed input
#[derive(Debug, Clone, Copy)]
pub struct TrackerStatus {
    pub phase: CalibrationPhase,
    pub orientation: UnitQuaternion<f32>,
    pub states: FusionInternalStates,
    /// Inputs processed since the tracker started
    pub processed: u64,
}

impl Default for TrackerStatus {
    fn default() -> Self {
        Self {
            phase: CalibrationPhase::NotStarted,
            orientation: UnitQuaternion::identity(),
            states: FusionInternalStates::default(),
            processed: 0,
        }
    }
}

/// Fusion engine running on a dedicated thread
///
/// # Example
/// ```
/// use std::time::Duration;
/// use nalgebra::UnitQuaternion;
/// use gaze_fusion::{AbsoluteSample, CalibrationPhase, Event, FusionSettings, Tracker};
///
/// let (events, received) = crossbeam_channel::unbounded::<Event>();
/// let mut tracker = Tracker::spawn(FusionSettings::default(), 64, events).unwrap();
///
/// tracker
///     .on_absolute(AbsoluteSample {
///         orientation: UnitQuaternion::identity(),
///         timestamp: Duration::ZERO,
///     })
///     .unwrap();
/// tracker.stop();
///
/// assert_eq!(received.try_recv(), Ok(Event::CalibrationStarted));
/// assert_eq!(tracker.status().phase, CalibrationPhase::InProgress);
/// ```
#[derive(Debug)]
pub struct Tracker {
    inputs: Option<Sender<TrackerInput>>,
    status: Arc<Mutex<TrackerStatus>>,
    thread: Option<JoinHandle<()>>,
}

impl Tracker {
    /// Spawn the tracker thread with an input queue of `capacity` entries
    ///
    /// Every event the engine produces is handed to `sink` on the tracker
    /// thread.
    pub fn spawn<S>(settings: FusionSettings, capacity: usize, sink: S) -> Result<Self>
    where
        S: EventSink + Send + 'static,
    {
        settings.validate()?;
        if capacity == 0 {
            return Err(FusionError::InvalidSettings(
                "input queue capacity must be positive".into(),
            ));
        }

        let (inputs, queue) = bounded(capacity);
        let status = Arc::new(Mutex::new(TrackerStatus::default()));
        let thread_status = Arc::clone(&status);
        let thread = thread::Builder::new()
            .name("fusion-tracker".into())
            .spawn(move || run(Fusion::with_settings(settings), queue, sink, &thread_status))?;

        info!(capacity, "Tracker started");
        Ok(Self {
            inputs: Some(inputs),
            status,
            thread: Some(thread),
        })
    }

    /// Queue an absolute-orientation sample; dropped if the queue is full
    pub fn on_absolute(&self, sample: AbsoluteSample) -> Result<()> {
        self.submit_sample(TrackerInput::Absolute(sample))
    }

    /// Queue a gyroscope sample; dropped if the queue is full
    pub fn on_gyroscope(&self, sample: GyroscopeSample) -> Result<()> {
        self.submit_sample(TrackerInput::Gyroscope(sample))
    }

    /// Restart tracking and calibration
    ///
    /// # Errors
    /// `QueueFull` if the command could not be queued, `Disconnected` once the
    /// tracker has stopped.
    pub fn reset(&self) -> Result<()> {
        let inputs = self.inputs.as_ref().ok_or(FusionError::Disconnected)?;
        inputs.try_send(TrackerInput::Reset).map_err(|err| {
            warn!("Tracker reset could not be queued");
            FusionError::from(err)
        })
    }

    /// Engine state as of the last processed input
    pub fn status(&self) -> TrackerStatus {
        *self.status.lock()
    }

    /// Close the queue, process what is left and join the thread
    pub fn stop(&mut self) {
        self.inputs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Tracker thread panicked");
            } else {
                info!("Tracker stopped");
            }
        }
    }

    fn submit_sample(&self, input: TrackerInput) -> Result<()> {
        let inputs = self.inputs.as_ref().ok_or(FusionError::Disconnected)?;
        match inputs.try_send(input) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                debug!(input = ?dropped, "Tracker queue full, sample dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(FusionError::Disconnected),
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<S: EventSink>(
    mut fusion: Fusion,
    queue: Receiver<TrackerInput>,
    mut sink: S,
    status: &Mutex<TrackerStatus>,
) {
    let mut processed = 0u64;

    for input in queue.iter() {
        match input {
            TrackerInput::Absolute(sample) => fusion.update_absolute(&sample, &mut sink),
            TrackerInput::Gyroscope(sample) => fusion.update_gyroscope(&sample, &mut sink),
            TrackerInput::Reset => {
                info!("Tracker reset, waiting for the next absolute sample");
                fusion.reset();
            }
        }
        processed += 1;

        *status.lock() = TrackerStatus {
            phase: fusion.phase(),
            orientation: fusion.quaternion(),
            states: fusion.internal_states(),
            processed,
        };
    }

    trace!(processed, "Tracker queue closed");
}
