//! Axis remapping between the sensor world frame and the device frame
//!
//! Rotation sensors report orientation relative to an East-North-Up world
//! frame. Angles that mean something to the wearer (looking up or down) have to
//! be taken relative to the physical device instead: the rotation matrix is
//! re-expressed with a chosen pair of device axes as its new X and Y, and the
//! orientation angles are read off the remapped matrix.
//!
//! # Example
//! ```
//! use nalgebra::UnitQuaternion;
//! use gaze_fusion::remap::{DeviceFrame, device_pitch};
//!
//! // Device lying flat, screen up: the screen normal points at the sky
//! let flat = UnitQuaternion::identity();
//! let pitch = device_pitch(&flat, DeviceFrame::default()).unwrap();
//! assert!((pitch.to_degrees() + 90.0).abs() < 1e-3);
//! ```

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::math::QuaternionExt;

/// Signed device axis
///
/// `MinusX` means the device X axis, inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
    MinusX,
    MinusY,
    MinusZ,
}

impl Axis {
    /// Column index of the axis in a rotation matrix
    fn index(self) -> usize {
        match self {
            Axis::X | Axis::MinusX => 0,
            Axis::Y | Axis::MinusY => 1,
            Axis::Z | Axis::MinusZ => 2,
        }
    }

    fn is_negative(self) -> bool {
        matches!(self, Axis::MinusX | Axis::MinusY | Axis::MinusZ)
    }
}

/// Device frame used for pitch extraction
///
/// `x` and `y` name the axes the device X and Y axes are mapped onto. The
/// default flips the device X axis so the left-pointing screen-tangential axis
/// becomes the reference X, and maps the vertical device Y axis onto Z, which
/// leaves the screen normal as the new Y. Pitch is then the tilt of the line of
/// sight: positive toward the sky, negative toward the ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFrame {
    pub x: Axis,
    pub y: Axis,
}

impl Default for DeviceFrame {
    fn default() -> Self {
        Self {
            x: Axis::MinusX,
            y: Axis::Z,
        }
    }
}

/// Re-express a rotation matrix in a remapped device frame
///
/// The device X axis is mapped onto axis `x` of the new frame and the device Y
/// axis onto axis `y`. The device Z axis takes the remaining axis, with its sign
/// chosen so the frame stays right-handed.
///
/// # Errors
/// `FusionError::InvalidRemap` when `x` and `y` refer to the same axis.
pub fn remap_coordinate_system(matrix: &Matrix3<f32>, x: Axis, y: Axis) -> Result<Matrix3<f32>> {
    let (xi, yi) = (x.index(), y.index());
    if xi == yi {
        return Err(FusionError::InvalidRemap(format!(
            "{x:?} and {y:?} share an axis"
        )));
    }
    let zi = 3 - xi - yi;

    // (x, y, z) in cyclic order keeps handedness; otherwise Z flips
    let cyclic = (zi + 1) % 3 == xi && (zi + 2) % 3 == yi;
    let negate_z = (x.is_negative() ^ y.is_negative()) ^ !cyclic;

    let signed = |v: Vector3<f32>, negate: bool| if negate { -v } else { v };

    let mut remapped = Matrix3::zeros();
    remapped.set_column(xi, &signed(matrix.column(0).into_owned(), x.is_negative()));
    remapped.set_column(yi, &signed(matrix.column(1).into_owned(), y.is_negative()));
    remapped.set_column(zi, &signed(matrix.column(2).into_owned(), negate_z));
    Ok(remapped)
}

/// Orientation angles (azimuth, pitch, roll) in radians from a rotation matrix
///
/// Azimuth is the rotation about the world up axis, pitch the tilt of the
/// matrix Y axis out of the horizontal plane, roll the rotation about it.
pub fn orientation_angles(matrix: &Matrix3<f32>) -> Vector3<f32> {
    let azimuth = matrix[(0, 1)].atan2(matrix[(1, 1)]);
    // atan2 stays accurate next to +-90 degrees where asin does not
    let horizontal = (matrix[(2, 0)] * matrix[(2, 0)] + matrix[(2, 2)] * matrix[(2, 2)]).sqrt();
    let pitch = (-matrix[(2, 1)]).atan2(horizontal);
    let roll = (-matrix[(2, 0)]).atan2(matrix[(2, 2)]);
    Vector3::new(azimuth, pitch, roll)
}

/// Device-frame pitch of a world-frame orientation in radians
pub fn device_pitch(orientation: &UnitQuaternion<f32>, frame: DeviceFrame) -> Result<f32> {
    let remapped = remap_coordinate_system(&orientation.to_matrix(), frame.x, frame.y)?;
    Ok(orientation_angles(&remapped).y)
}
