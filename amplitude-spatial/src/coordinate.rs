//! Cartesian coordinate systems and conversion between them.

use glam::{Mat3, Quat, Vec3};

/// One of the six signed cardinal directions a coordinate system's axes can
/// point along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    PositiveX,
    PositiveY,
    PositiveZ,
    NegativeX,
    NegativeY,
    NegativeZ,
}

impl Axis {
    pub fn vector(self) -> Vec3 {
        match self {
            Axis::PositiveX => Vec3::X,
            Axis::PositiveY => Vec3::Y,
            Axis::PositiveZ => Vec3::Z,
            Axis::NegativeX => Vec3::NEG_X,
            Axis::NegativeY => Vec3::NEG_Y,
            Axis::NegativeZ => Vec3::NEG_Z,
        }
    }
}

/// Describes which world direction is right, forward, and up for some data
/// source, so Amplitude can convert incoming positions/orientations into
/// its own internal system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartesianCoordinateSystem {
    right: Axis,
    forward: Axis,
    up: Axis,
}

impl CartesianCoordinateSystem {
    pub fn new(right: Axis, forward: Axis, up: Axis) -> Self {
        Self { right, forward, up }
    }

    /// Amplitude's own system: right-handed, Z-up.
    pub fn default_system() -> Self {
        Self::right_handed_z_up()
    }

    pub fn ambix() -> Self {
        Self::new(Axis::NegativeY, Axis::PositiveX, Axis::PositiveZ)
    }

    pub fn right_handed_y_up() -> Self {
        Self::new(Axis::PositiveX, Axis::NegativeZ, Axis::PositiveY)
    }

    pub fn left_handed_y_up() -> Self {
        Self::new(Axis::PositiveX, Axis::PositiveZ, Axis::PositiveY)
    }

    pub fn right_handed_z_up() -> Self {
        Self::new(Axis::PositiveX, Axis::PositiveY, Axis::PositiveZ)
    }

    pub fn left_handed_z_up() -> Self {
        Self::new(Axis::PositiveX, Axis::NegativeY, Axis::PositiveZ)
    }

    pub fn right_vector(&self) -> Vec3 {
        self.right.vector()
    }

    pub fn forward_vector(&self) -> Vec3 {
        self.forward.vector()
    }

    pub fn up_vector(&self) -> Vec3 {
        self.up.vector()
    }

    fn basis(&self) -> Mat3 {
        Mat3::from_cols(self.right_vector(), self.forward_vector(), self.up_vector())
    }

    pub fn convert(&self, vector: Vec3, from: &CartesianCoordinateSystem) -> Vec3 {
        Converter::new(*from, *self).forward(vector)
    }

    pub fn convert_quat(&self, quaternion: Quat, from: &CartesianCoordinateSystem) -> Quat {
        Converter::new(*from, *self).forward_quat(quaternion)
    }

    pub fn convert_static(vector: Vec3, from: &Self, to: &Self) -> Vec3 {
        to.convert(vector, from)
    }

    pub fn convert_to_default(vector: Vec3, from: &Self) -> Vec3 {
        Self::default_system().convert(vector, from)
    }
}

/// Caches the forward/backward transform between two coordinate systems so
/// repeated conversions (e.g. every frame, for every game object) don't
/// rebuild the basis matrices each time.
pub struct Converter {
    from_to: Mat3,
    to_from: Mat3,
    winding_swap: f32,
}

impl Converter {
    pub fn new(from: CartesianCoordinateSystem, to: CartesianCoordinateSystem) -> Self {
        let from_basis = from.basis();
        let to_basis = to.basis();
        let from_to = to_basis.transpose() * from_basis;
        let to_from = from_basis.transpose() * to_basis;
        let winding_swap = from_to.determinant().signum();
        Self {
            from_to,
            to_from,
            winding_swap,
        }
    }

    pub fn forward(&self, vector: Vec3) -> Vec3 {
        self.from_to * vector
    }

    pub fn backward(&self, vector: Vec3) -> Vec3 {
        self.to_from * vector
    }

    pub fn forward_quat(&self, quaternion: Quat) -> Quat {
        conjugate_quat_by_basis(quaternion, self.from_to, self.winding_swap)
    }

    pub fn backward_quat(&self, quaternion: Quat) -> Quat {
        conjugate_quat_by_basis(quaternion, self.to_from, self.winding_swap)
    }

    pub fn forward_scalar(&self, scalar: f32) -> f32 {
        scalar
    }

    pub fn backward_scalar(&self, scalar: f32) -> f32 {
        scalar
    }
}

fn conjugate_quat_by_basis(q: Quat, basis: Mat3, winding_swap: f32) -> Quat {
    let mut rotated = basis * Mat3::from_quat(q) * basis.transpose();
    if winding_swap < 0.0 {
        // A handedness flip turns the proper rotation into a reflection;
        // mirror it back onto SO(3) by negating the determinant-carrying
        // row before extracting the quaternion.
        rotated.z_axis = -rotated.z_axis;
    }
    Quat::from_mat3(&rotated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_conversion_preserves_vector() {
        let sys = CartesianCoordinateSystem::default_system();
        let v = Vec3::new(1.0, 2.0, 3.0);
        let converted = sys.convert(v, &sys);
        assert!((converted - v).length() < 1e-5);
    }

    #[test]
    fn round_trip_through_ambix_preserves_vector() {
        let default_sys = CartesianCoordinateSystem::default_system();
        let ambix = CartesianCoordinateSystem::ambix();
        let converter = Converter::new(default_sys, ambix);
        let v = Vec3::new(1.0, -2.0, 0.5);
        let forward = converter.forward(v);
        let back = converter.backward(forward);
        assert!((back - v).length() < 1e-5, "{back:?} vs {v:?}");
    }

    #[test]
    fn y_up_forward_maps_to_z_up_up() {
        let y_up = CartesianCoordinateSystem::right_handed_y_up();
        let z_up = CartesianCoordinateSystem::right_handed_z_up();
        let converted = z_up.convert(Vec3::Y, &y_up);
        assert!((converted - Vec3::Z).length() < 1e-5);
    }
}
