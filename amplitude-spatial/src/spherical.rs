//! Spherical positions used to describe a sound source's direction relative
//! to a listener.

use glam::{Quat, Vec3};

const EQUALITY_EPSILON: f32 = 1e-4;

/// A direction and distance expressed as azimuth/elevation/radius.
///
/// Azimuth is measured counter-clockwise from `+X` in the `XY` plane (the
/// world-space convention); elevation is measured from the `XY` plane
/// toward `+Z`. Both are in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalPosition {
    azimuth: f32,
    elevation: f32,
    radius: f32,
}

impl SphericalPosition {
    pub fn new(azimuth: f32, elevation: f32, radius: f32) -> Self {
        Self {
            azimuth,
            elevation,
            radius,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Builds a spherical position from a world-space offset vector
    /// (listener-relative), using the world-space azimuth/elevation
    /// convention.
    pub fn from_world_space(vector: Vec3) -> Self {
        let radius = vector.length();
        if radius < 1e-8 {
            return Self::zero();
        }
        let azimuth = vector.y.atan2(vector.x);
        let elevation = (vector.z / radius).clamp(-1.0, 1.0).asin();
        Self::new(azimuth, elevation, radius)
    }

    /// Builds a spherical position from a vector expressed in the HRTF
    /// convention: azimuth `0` is straight ahead (`+Y`), increasing
    /// clockwise toward the listener's right (`+X`).
    pub fn for_hrtf(vector: Vec3) -> Self {
        let radius = vector.length();
        if radius < 1e-8 {
            return Self::zero();
        }
        let hrtf_azimuth = vector.x.atan2(vector.y);
        // The world-space azimuth is measured from +X, the HRTF azimuth
        // from +Y; the two conventions are a quarter turn apart.
        let azimuth = std::f32::consts::FRAC_PI_2 - hrtf_azimuth;
        let elevation = (vector.z / radius).clamp(-1.0, 1.0).asin();
        Self::new(azimuth, elevation, radius)
    }

    pub fn azimuth(&self) -> f32 {
        self.azimuth
    }

    pub fn elevation(&self) -> f32 {
        self.elevation
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// The azimuth in the HRTF convention (0 = front, positive = right).
    pub fn hrtf_azimuth(&self) -> f32 {
        std::f32::consts::FRAC_PI_2 - self.azimuth
    }

    pub fn to_cartesian(&self) -> Vec3 {
        let horizontal = self.elevation.cos() * self.radius;
        Vec3::new(
            horizontal * self.azimuth.cos(),
            horizontal * self.azimuth.sin(),
            self.elevation.sin() * self.radius,
        )
    }

    pub fn flip_azimuth(&self) -> Self {
        Self::new(-self.azimuth, self.elevation, self.radius)
    }

    pub fn rotate(&self, rotation: Quat) -> Self {
        Self::from_world_space(rotation * self.to_cartesian())
    }

    pub fn approx_eq(&self, other: &Self) -> bool {
        (self.radius - other.radius).abs() < EQUALITY_EPSILON
            && angle_diff(self.azimuth, other.azimuth).abs() < EQUALITY_EPSILON
            && angle_diff(self.elevation, other.elevation).abs() < EQUALITY_EPSILON
    }
}

fn angle_diff(a: f32, b: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let mut d = (a - b) % two_pi;
    if d > std::f32::consts::PI {
        d -= two_pi;
    } else if d < -std::f32::consts::PI {
        d += two_pi;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_round_trip_preserves_direction() {
        let original = Vec3::new(3.0, -4.0, 2.0);
        let spherical = SphericalPosition::from_world_space(original);
        let back = spherical.to_cartesian();
        assert!((back - original).length() < 1e-3, "{back:?} vs {original:?}");
    }

    #[test]
    fn flip_azimuth_mirrors_left_and_right() {
        let front_right = SphericalPosition::from_world_space(Vec3::new(1.0, 1.0, 0.0));
        let mirrored = front_right.flip_azimuth();
        let expected = SphericalPosition::from_world_space(Vec3::new(-1.0, 1.0, 0.0));
        assert!(mirrored.approx_eq(&expected));
    }

    #[test]
    fn hrtf_front_is_zero_azimuth() {
        let front = SphericalPosition::for_hrtf(Vec3::new(0.0, 1.0, 0.0));
        assert!(front.hrtf_azimuth().abs() < 1e-4);
    }

    #[test]
    fn zero_vector_yields_zero_position() {
        let position = SphericalPosition::from_world_space(Vec3::ZERO);
        assert_eq!(position.radius(), 0.0);
    }
}
