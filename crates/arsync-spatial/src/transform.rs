//! AR ⇄ world coordinate transform.
//!
//! A [`CoordinateTransform`] is fixed by one correspondence point (an AR
//! position and the world position it is known to sit at) plus an
//! orientation offset.  Converting a point from the AR frame to the world
//! frame:
//!
//! 1. subtract the AR anchor,
//! 2. remap the device axes onto world axes with the session's
//!    [`AxisRemap`] (a fixed permutation/sign table, not a rotation),
//! 3. rotate by the calibrated orientation offset,
//! 4. add the world anchor.
//!
//! [`CoordinateTransform::world_to_ar`] runs the same steps backwards.
//!
//! # Example
//!
//! ```rust
//! use arsync_spatial::transform::CoordinateTransform;
//! use arsync_types::{ArPoint3D, ArRotation, CoordinateSystem, WorldPoint3D};
//!
//! let mut tf = CoordinateTransform::new(CoordinateSystem::ArKit);
//! tf.calibrate(
//!     ArPoint3D::origin(),
//!     WorldPoint3D::new(100.0, 200.0, 10.0),
//!     ArRotation::identity(),
//! ).unwrap();
//!
//! // ARKit is Y-up with −Z forward; the building is Z-up.
//! let w = tf.ar_to_world(&ArPoint3D::new(1.0, 2.0, -3.0)).unwrap();
//! assert!((w.y - 203.0).abs() < 1e-9);
//! assert!((w.z - 12.0).abs() < 1e-9);
//! ```

use arsync_types::{ArError, ArPoint3D, ArRotation, CoordinateSystem, WorldPoint3D};
use tracing::{debug, info};

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: [f64; 3]) -> [f64; 3] {
        let p = Self::new(0.0, v[0], v[1], v[2]);
        let rotated = self.mul(p).mul(self.conjugate());
        [rotated.x, rotated.y, rotated.z]
    }
}

impl From<ArRotation> for Quaternion {
    fn from(r: ArRotation) -> Self {
        Self::new(r.w, r.x, r.y, r.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Axis remap
// ────────────────────────────────────────────────────────────────────────────

/// Fixed permutation/sign table from device AR axes to world axes.
///
/// `world[i] = sign_i * ar[source_i]` for each world axis `i`
/// (x = east, y = north, z = altitude).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRemap {
    table: [(usize, f64); 3],
}

impl AxisRemap {
    /// The table for a device convention.
    pub fn for_system(system: CoordinateSystem) -> Self {
        let table = match system {
            // +Y up, −Z forward: world = (x, −z, y)
            CoordinateSystem::ArKit | CoordinateSystem::ArCore => {
                [(0, 1.0), (2, -1.0), (1, 1.0)]
            }
            // Left-handed, +Y up, +Z forward: world = (x, z, y)
            CoordinateSystem::Unity => [(0, 1.0), (2, 1.0), (1, 1.0)],
            CoordinateSystem::ZUp => [(0, 1.0), (1, 1.0), (2, 1.0)],
        };
        Self { table }
    }

    pub fn to_world(&self, ar: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (axis, (source, sign)) in self.table.iter().enumerate() {
            out[axis] = sign * ar[*source];
        }
        out
    }

    pub fn to_ar(&self, world: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (axis, (source, sign)) in self.table.iter().enumerate() {
            out[*source] = sign * world[axis];
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CoordinateTransform
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct Calibration {
    ar_anchor: ArPoint3D,
    world_anchor: WorldPoint3D,
    rotation: Quaternion,
}

/// Converts points between one session's AR frame and the building's world
/// frame.  Conversions fail with [`ArError::NotCalibrated`] until
/// [`CoordinateTransform::calibrate`] has run.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateTransform {
    system: CoordinateSystem,
    remap: AxisRemap,
    calibration: Option<Calibration>,
}

impl CoordinateTransform {
    /// An uncalibrated transform for the given device convention.
    pub fn new(system: CoordinateSystem) -> Self {
        Self {
            system,
            remap: AxisRemap::for_system(system),
            calibration: None,
        }
    }

    pub fn coordinate_system(&self) -> CoordinateSystem {
        self.system
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    /// Fix the correspondence `ar_anchor ↔ world_anchor` and the orientation
    /// offset (expressed in world axes, applied after the axis remap).
    ///
    /// Any previous calibration is overwritten; there is no averaging across
    /// calls.  The rotation is normalised before it is stored.
    ///
    /// # Errors
    ///
    /// Returns [`ArError::InvalidRotation`] for a zero-norm quaternion.
    pub fn calibrate(
        &mut self,
        ar_anchor: ArPoint3D,
        world_anchor: WorldPoint3D,
        rotation: ArRotation,
    ) -> Result<(), ArError> {
        let unit = rotation.normalized().ok_or(ArError::InvalidRotation)?;
        let recalibration = self.calibration.is_some();
        self.calibration = Some(Calibration {
            ar_anchor,
            world_anchor,
            rotation: unit.into(),
        });
        info!(
            system = ?self.system,
            recalibration,
            world_x = world_anchor.x,
            world_y = world_anchor.y,
            world_z = world_anchor.z,
            "coordinate transform calibrated"
        );
        Ok(())
    }

    /// Shift the AR anchor by a measured drift (observed − known, AR frame),
    /// so that points reported after the drift land where they did before it.
    ///
    /// # Errors
    ///
    /// Returns [`ArError::NotCalibrated`] when there is nothing to correct.
    pub fn apply_drift(&mut self, drift: &ArPoint3D) -> Result<(), ArError> {
        let calibration = self.calibration.as_mut().ok_or(ArError::NotCalibrated)?;
        calibration.ar_anchor = calibration.ar_anchor.translate(drift);
        debug!(dx = drift.x, dy = drift.y, dz = drift.z, "applied drift correction");
        Ok(())
    }

    /// Convert an AR-frame point into the world frame.
    pub fn ar_to_world(&self, point: &ArPoint3D) -> Result<WorldPoint3D, ArError> {
        let cal = self.calibration.as_ref().ok_or(ArError::NotCalibrated)?;
        let local = point.offset_from(&cal.ar_anchor);
        let remapped = self.remap.to_world([local.x, local.y, local.z]);
        let [x, y, z] = cal.rotation.rotate(remapped);
        Ok(WorldPoint3D::new(
            cal.world_anchor.x + x,
            cal.world_anchor.y + y,
            cal.world_anchor.z + z,
        ))
    }

    /// Convert a world-frame point into this session's AR frame.
    pub fn world_to_ar(&self, point: &WorldPoint3D) -> Result<ArPoint3D, ArError> {
        let cal = self.calibration.as_ref().ok_or(ArError::NotCalibrated)?;
        let relative = [
            point.x - cal.world_anchor.x,
            point.y - cal.world_anchor.y,
            point.z - cal.world_anchor.z,
        ];
        let unrotated = cal.rotation.conjugate().rotate(relative);
        let [x, y, z] = self.remap.to_ar(unrotated);
        Ok(ArPoint3D::new(x, y, z).translate(&cal.ar_anchor))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
