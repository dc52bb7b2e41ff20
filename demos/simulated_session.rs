//! Simulated tracking session
//!
//! Drives a session with synthetic sensor data: the wearer holds still while
//! calibration runs, then turns and tilts the head while the rotation-vector
//! sensor occasionally glitches. Events are printed as they arrive.
//!
//! Run with: `cargo run --example simulated_session [config.toml]`
//! Set `RUST_LOG=gaze_fusion=debug` to see dropped and rejected samples.

use std::error::Error;
use std::time::Duration;

use gaze_fusion::{Event, QuaternionExt, Session, SessionConfig};
use nalgebra::{UnitQuaternion, Vector3};
use rand::prelude::*;
use rand_pcg::Pcg64;

const SAMPLE_RATE: u64 = 100; // Hz
const ABSOLUTE_DIVIDER: u64 = 5; // rotation vector at 20 Hz

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gaze_fusion=info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig {
            queue_capacity: 8192,
            job_capacity: 8192,
            ..Default::default()
        },
    };
    let calibration_seconds = config.fusion.calibration_period;
    println!("Simulated session - calibration takes {calibration_seconds:.1} s, hold still");

    let mut session = Session::with_config(config)?;
    let events = session.events();
    let mut rng = Pcg64::seed_from_u64(2024);

    // Upright device looking at the horizon
    let base = UnitQuaternion::from_euler_degrees(90.0, 0.0, 0.0);
    let still_steps = ((calibration_seconds + 1.0) * SAMPLE_RATE as f32) as u64;
    let motion_steps = 3 * SAMPLE_RATE;
    let dt = 1.0 / SAMPLE_RATE as f32;

    // Head yaw and pitch rates (rad/s) during the motion phase
    let yaw_rate = 30f32.to_radians();
    let pitch_rate = 10f32.to_radians();

    let mut orientation = base;
    for step in 0..still_steps + motion_steps {
        let timestamp = Duration::from_millis(step * 1000 / SAMPLE_RATE);
        let moving = step >= still_steps;

        // Body-frame rates: yaw about the world vertical, pitch about the device X
        let world_rate = if moving {
            Vector3::new(0.0, 0.0, yaw_rate)
        } else {
            Vector3::zeros()
        };
        let mut body_rate = orientation.inverse_transform_vector(&world_rate);
        if moving {
            body_rate.x += pitch_rate;
        }
        orientation = orientation * UnitQuaternion::from_scaled_axis(body_rate * dt);

        let noise = Vector3::new(
            rng.random_range(-0.02..0.02),
            rng.random_range(-0.02..0.02),
            rng.random_range(-0.02..0.02),
        );
        session.on_gyroscope_sample(body_rate + noise, timestamp)?;

        if step % ABSOLUTE_DIVIDER == 0 {
            let glitch = rng.random_bool(0.02);
            let reported = if glitch {
                orientation * UnitQuaternion::from_euler_degrees(0.0, 0.0, 80.0)
            } else {
                orientation
            };
            session.on_absolute_orientation_sample(reported.into_inner(), timestamp)?;
        }

        for event in events.try_iter() {
            print_event(&event, timestamp);
        }
    }

    session.stop();
    let timestamp = Duration::from_millis((still_steps + motion_steps) * 1000 / SAMPLE_RATE);
    for event in events.try_iter() {
        print_event(&event, timestamp);
    }

    let status = session.status();
    println!("\nFinal state");
    println!("  phase:           {:?}", status.phase);
    println!("  panic resets:    {}", status.states.panic_resets);
    println!("  agreement:       {:.3}", status.states.agreement);
    let angles = session.gaze_angles()?;
    println!("  gaze pitch/yaw:  {:.1} / {:.1} degrees", angles.pitch, angles.yaw);
    println!("  head motion:     {:.0} degrees tilt, {:.0} degrees turn", 30.0, 90.0);

    Ok(())
}

fn print_event(event: &Event, timestamp: Duration) {
    let seconds = timestamp.as_secs_f32();
    match event {
        Event::CalibrationStarted => println!("[{seconds:6.2}] calibration started"),
        Event::CalibrationAboutToFinish => println!("[{seconds:6.2}] calibration about to finish"),
        Event::CalibrationFinished(reference) => {
            let euler = reference.to_euler_degrees();
            println!(
                "[{seconds:6.2}] calibration finished at roll {:.1} pitch {:.1} yaw {:.1}",
                euler.x, euler.y, euler.z
            );
        }
        Event::GazeOrientationUpdated(angles) => {
            // Once per second is enough
            if timestamp.subsec_millis() == 0 {
                println!(
                    "[{seconds:6.2}] gaze pitch {:6.1} yaw {:6.1}",
                    angles.pitch, angles.yaw
                );
            }
        }
        Event::OrientationUpdated(_) | Event::FingerOrientationUpdated(_) => {}
    }
}
