//! Quaternion algebra and nalgebra extensions for the gaze-fusion library
//!
//! All orientations are `UnitQuaternion<f32>` in the Hamilton convention. The
//! free functions here are the operations the fusion engine and the derivation
//! units are written against; values entering from outside the crate go
//! through [`checked_unit`] or [`from_rotation_vector`] so the unit-norm
//! invariant holds everywhere downstream.

use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};

use crate::error::{FusionError, Result};

/// Mathematical constants
pub const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;
pub const RAD_TO_DEG: f32 = 180.0 / core::f32::consts::PI;

/// Epsilon below which two orientations are considered antipodal in slerp
const SLERP_EPSILON: f32 = 1.0e-6;

/// Extension trait for Vector3 operations
pub trait Vector3Ext {
    /// Unit vector, or the zero vector when the magnitude is zero or not finite
    fn safe_normalize(&self) -> Vector3<f32>;
}

impl Vector3Ext for Vector3<f32> {
    fn safe_normalize(&self) -> Vector3<f32> {
        let magnitude = self.norm();
        if magnitude > 0.0 && magnitude.is_finite() {
            *self / magnitude
        } else {
            Vector3::zeros()
        }
    }
}

/// Normalize a raw quaternion, rejecting zero and non-finite input
///
/// # Example
/// ```
/// use nalgebra::Quaternion;
/// use gaze_fusion::math::checked_unit;
///
/// let q = checked_unit(Quaternion::new(2.0, 0.0, 0.0, 0.0)).unwrap();
/// assert!((q.w - 1.0).abs() < 1e-6);
/// assert!(checked_unit(Quaternion::new(0.0, 0.0, 0.0, 0.0)).is_err());
/// ```
pub fn checked_unit(q: Quaternion<f32>) -> Result<UnitQuaternion<f32>> {
    let norm = q.norm();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return Err(FusionError::DegenerateQuaternion(norm));
    }
    Ok(UnitQuaternion::new_normalize(q))
}

/// Build a unit quaternion from x, y, z, w components
pub fn from_xyzw(x: f32, y: f32, z: f32, w: f32) -> Result<UnitQuaternion<f32>> {
    checked_unit(Quaternion::new(w, x, y, z))
}

/// Convert a rotation-vector sensor payload into a unit quaternion
///
/// The payload is `[x, y, z]`, `[x, y, z, w]` or `[x, y, z, w, accuracy]`.
/// When the scalar part is absent it is reconstructed from the vector part.
pub fn from_rotation_vector(values: &[f32]) -> Result<UnitQuaternion<f32>> {
    let (x, y, z) = match values {
        [x, y, z, ..] if values.len() <= 5 => (*x, *y, *z),
        _ => return Err(FusionError::InvalidRotationVector(values.len())),
    };
    let w = match values.get(3) {
        Some(w) => *w,
        None => (1.0 - x * x - y * y - z * z).max(0.0).sqrt(),
    };
    from_xyzw(x, y, z, w)
}

/// Compose two rotations: apply `delta`, then `base`
///
/// `delta` is expressed in the local frame of `base`, which is how a
/// gyroscope reports rotation, so the result is `base * delta`.
pub fn compose(delta: &UnitQuaternion<f32>, base: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    // Re-normalize so float error does not accumulate over long integrations
    UnitQuaternion::new_normalize(base.into_inner() * delta.into_inner())
}

/// Inverse of a unit quaternion (its conjugate)
pub fn inverse(q: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    q.conjugate()
}

/// Four-dimensional dot product of two unit quaternions
///
/// 1.0 for identical orientations. `q` and `-q` encode the same rotation, so
/// closeness must be judged on the absolute value.
pub fn dot(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>) -> f32 {
    a.coords.dot(&b.coords)
}

/// Spherical linear interpolation along the shortest arc
///
/// `t` is clamped to `[0, 1]`. The endpoints are returned exactly. For the
/// antipodal case, where no unique arc exists, `a` is returned.
pub fn slerp(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>, t: f32) -> UnitQuaternion<f32> {
    if t <= 0.0 {
        return *a;
    }
    if t >= 1.0 {
        return *b;
    }
    a.try_slerp(b, t, SLERP_EPSILON).unwrap_or(*a)
}

/// Delta rotation produced by an angular rate held for `delta_time` seconds
///
/// The rotation axis is only normalized when the rate magnitude exceeds
/// `noise_threshold`; slower samples are treated as no motion.
pub fn from_angular_rate(
    angular_rate: &Vector3<f32>,
    delta_time: f32,
    noise_threshold: f32,
) -> UnitQuaternion<f32> {
    let magnitude = angular_rate.norm();
    if !(magnitude > noise_threshold) || !magnitude.is_finite() {
        return UnitQuaternion::identity();
    }

    let axis = angular_rate.safe_normalize();
    let half_angle = magnitude * delta_time * 0.5;
    let (sin_half, cos_half) = half_angle.sin_cos();
    UnitQuaternion::new_normalize(Quaternion::new(
        cos_half,
        axis.x * sin_half,
        axis.y * sin_half,
        axis.z * sin_half,
    ))
}

/// Extension trait for UnitQuaternion operations
pub trait QuaternionExt {
    /// Rotation matrix representation
    fn to_matrix(&self) -> Matrix3<f32>;

    /// Build from a rotation matrix
    fn from_matrix(matrix: &Matrix3<f32>) -> UnitQuaternion<f32>;

    /// Rotation about the up (Z) axis in radians
    fn yaw(&self) -> f32;

    /// Rotation about the Y axis in radians
    fn pitch(&self) -> f32;

    /// Rotation about the X axis in radians
    fn roll(&self) -> f32;

    /// Convert quaternion to Euler angles (roll, pitch, yaw) in degrees
    fn to_euler_degrees(&self) -> Vector3<f32>;

    /// Create quaternion from Euler angles in degrees
    fn from_euler_degrees(roll: f32, pitch: f32, yaw: f32) -> UnitQuaternion<f32>;
}

impl QuaternionExt for UnitQuaternion<f32> {
    fn to_matrix(&self) -> Matrix3<f32> {
        self.to_rotation_matrix().into_inner()
    }

    fn from_matrix(matrix: &Matrix3<f32>) -> UnitQuaternion<f32> {
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*matrix))
    }

    fn yaw(&self) -> f32 {
        self.euler_angles().2
    }

    fn pitch(&self) -> f32 {
        self.euler_angles().1
    }

    fn roll(&self) -> f32 {
        self.euler_angles().0
    }

    fn to_euler_degrees(&self) -> Vector3<f32> {
        let (roll, pitch, yaw) = self.euler_angles();
        Vector3::new(roll, pitch, yaw) * RAD_TO_DEG
    }

    fn from_euler_degrees(roll: f32, pitch: f32, yaw: f32) -> UnitQuaternion<f32> {
        UnitQuaternion::from_euler_angles(roll * DEG_TO_RAD, pitch * DEG_TO_RAD, yaw * DEG_TO_RAD)
    }
}
