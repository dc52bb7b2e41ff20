use gaze_fusion::{
    CalibrationPhase, Event, FusionError, QuaternionExt, Session, SessionConfig,
};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use std::thread;
use std::time::{Duration, Instant};

const EPSILON: f32 = 1e-3;

/// Queues large enough that no sample is dropped in a burst
fn roomy_config() -> SessionConfig {
    SessionConfig {
        queue_capacity: 8192,
        job_capacity: 8192,
        ..Default::default()
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Feed `seconds` of a still device: identity rotation vector at 20 Hz and a
/// silent gyroscope at 100 Hz
fn feed_still_device(session: &Session, orientation: Quaternion<f32>, seconds: u64) {
    for step in 0..=seconds * 100 {
        let t = step * 10;
        if step % 5 == 0 {
            session.on_absolute_orientation_sample(orientation, ms(t)).unwrap();
        }
        session.on_gyroscope_sample(Vector3::zeros(), ms(t)).unwrap();
    }
}

/// Block until the tracker has processed `inputs` samples
fn wait_for_tracker(session: &Session, inputs: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while session.status().processed < inputs {
        assert!(Instant::now() < deadline, "tracker stalled");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_session_calibrates_after_fifteen_seconds() {
    let mut session = Session::with_config(roomy_config()).unwrap();
    let events = session.events();

    feed_still_device(&session, Quaternion::identity(), 16);
    session.stop();

    let events: Vec<Event> = events.try_iter().collect();

    // Tracker events arrive in order; gaze events interleave from another thread
    let tracker_events: Vec<&Event> = events
        .iter()
        .filter(|event| {
            !matches!(
                event,
                Event::GazeOrientationUpdated(_) | Event::FingerOrientationUpdated(_)
            )
        })
        .collect();
    assert_eq!(*tracker_events[0], Event::CalibrationStarted);

    let position = |wanted: fn(&Event) -> bool| {
        tracker_events
            .iter()
            .position(|event| wanted(event))
            .unwrap()
    };
    let about = position(|e| matches!(e, Event::CalibrationAboutToFinish));
    let finished = position(|e| matches!(e, Event::CalibrationFinished(_)));
    // Index 0 is CalibrationStarted, then one update per 10 ms
    assert_eq!(about, 1 + 1199);
    assert_eq!(finished, 1 + 1499 + 1);

    match tracker_events[finished] {
        Event::CalibrationFinished(reference) => assert!(reference.angle() < EPSILON),
        other => panic!("unexpected event {other:?}"),
    }

    let gaze: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::GazeOrientationUpdated(angles) => Some(*angles),
            _ => None,
        })
        .collect();
    assert!(!gaze.is_empty());
    for angles in &gaze {
        assert!(angles.pitch.abs() < EPSILON, "pitch: {}", angles.pitch);
        assert!(angles.yaw.abs() < EPSILON, "yaw: {}", angles.yaw);
    }

    assert_eq!(session.status().phase, CalibrationPhase::Done);
    let angles = session.gaze_angles().unwrap();
    assert!(angles.pitch.abs() < EPSILON && angles.yaw.abs() < EPSILON);
}

#[test]
fn test_gaze_not_calibrated_before_window_closes() {
    let mut session = Session::with_config(roomy_config()).unwrap();

    feed_still_device(&session, Quaternion::identity(), 5);
    session.stop();

    assert_eq!(session.status().phase, CalibrationPhase::InProgress);
    assert!(matches!(
        session.gaze_angles(),
        Err(FusionError::NotCalibrated(_))
    ));
}

#[test]
fn test_turned_head_after_calibration() {
    let config = SessionConfig::from_toml_str(
        "queue_capacity = 8192\njob_capacity = 8192\n[fusion]\ncalibration_period = 1.0",
    )
    .unwrap();
    let mut session = Session::with_config(config).unwrap();

    feed_still_device(&session, Quaternion::identity(), 2);
    // 201 gyroscope and 41 rotation-vector samples
    wait_for_tracker(&session, 242);

    // Injected after every fused update has been queued
    let turned = UnitQuaternion::from_euler_degrees(0.0, 0.0, 30.0).into_inner();
    session.set_gaze_orientation(turned).unwrap();
    session.stop();

    let angles = session.gaze_angles().unwrap();
    assert!((angles.yaw - 30.0).abs() < EPSILON, "yaw: {}", angles.yaw);
    assert!(angles.pitch.abs() < EPSILON, "pitch: {}", angles.pitch);
}

#[test]
fn test_calibration_reaches_gaze_through_tiny_job_queue() {
    let config = SessionConfig::from_toml_str(
        "queue_capacity = 8192\njob_capacity = 2\n[fusion]\ncalibration_period = 0.5",
    )
    .unwrap();

    for _ in 0..10 {
        let mut session = Session::with_config(config).unwrap();
        feed_still_device(&session, Quaternion::identity(), 2);
        session.stop();

        assert_eq!(session.status().phase, CalibrationPhase::Done);
        let angles = session.gaze_angles().unwrap();
        assert!(angles.pitch.abs() < EPSILON, "pitch: {}", angles.pitch);
        assert!(angles.yaw.abs() < EPSILON, "yaw: {}", angles.yaw);
    }
}

#[test]
fn test_finger_is_independent_of_gaze() {
    let mut session = Session::with_config(roomy_config()).unwrap();

    session
        .set_finger_calibration(UnitQuaternion::from_euler_degrees(0.0, 0.0, 10.0).into_inner())
        .unwrap();
    session
        .set_finger_orientation(UnitQuaternion::from_euler_degrees(0.0, 0.0, 40.0).into_inner())
        .unwrap();
    session.stop();

    let finger = session.finger_angles().unwrap();
    assert!((finger.yaw + 30.0).abs() < EPSILON, "yaw: {}", finger.yaw);
    assert!(session.gaze_angles().is_err());
}

#[test]
fn test_recalibrate_restarts_window() {
    let config = SessionConfig::from_toml_str(
        "queue_capacity = 8192\njob_capacity = 8192\n[fusion]\ncalibration_period = 1.0",
    )
    .unwrap();
    let mut session = Session::with_config(config).unwrap();
    let events = session.events();

    feed_still_device(&session, Quaternion::identity(), 2);
    session.recalibrate().unwrap();
    feed_still_device(&session, Quaternion::identity(), 2);
    session.stop();

    let events: Vec<Event> = events.try_iter().collect();
    let count = |wanted: fn(&Event) -> bool| events.iter().filter(|e| wanted(e)).count();
    assert_eq!(count(|e| matches!(e, Event::CalibrationStarted)), 2);
    assert_eq!(count(|e| matches!(e, Event::CalibrationFinished(_))), 2);
    assert_eq!(session.status().phase, CalibrationPhase::Done);
}

#[test]
fn test_rotation_vector_payloads() {
    let mut session = Session::with_config(roomy_config()).unwrap();
    let events = session.events();

    // Three components: w is reconstructed
    session.on_rotation_vector(&[0.0, 0.0, 0.0], ms(0)).unwrap();
    // Five components: trailing accuracy estimate is ignored
    session
        .on_rotation_vector(&[0.0, 0.0, 0.0, 1.0, 0.5], ms(10))
        .unwrap();
    assert!(matches!(
        session.on_rotation_vector(&[0.0; 6], ms(20)),
        Err(FusionError::InvalidRotationVector(6))
    ));
    session.stop();

    assert_eq!(events.try_recv(), Ok(Event::CalibrationStarted));
    assert!(session.orientation().angle() < EPSILON);
}
