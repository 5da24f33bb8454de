//! Barycentric coordinates and ray-triangle intersection, used to find
//! which HRIR mesh face a listener direction falls into.

use glam::Vec3;

/// Barycentric weights for a point relative to a triangle's three
/// vertices. All three are in `[0, 1]` and sum to `1` exactly when the
/// point lies in the triangle's plane within the triangle's bounds.
#[derive(Debug, Clone, Copy)]
pub struct Barycentric {
    pub u: f32,
    pub v: f32,
    pub w: f32,
}

impl Barycentric {
    pub fn is_inside(&self) -> bool {
        self.u >= -1e-5 && self.v >= -1e-5 && self.w >= -1e-5
    }
}

/// Projects `point` onto the plane of triangle `(a, b, c)` and returns its
/// barycentric coordinates there.
pub fn barycentric_coordinates(point: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Barycentric {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = point - a;

    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);

    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < 1e-12 {
        return Barycentric { u: 1.0, v: 0.0, w: 0.0 };
    }

    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    let u = 1.0 - v - w;

    Barycentric { u, v, w }
}

/// Möller-Trumbore ray-triangle intersection. Returns the distance along
/// `direction` (from `origin`) at which the ray crosses the triangle, or
/// `None` if it misses or is parallel to the triangle's plane.
pub fn ray_triangle_intersect(
    origin: Vec3,
    direction: Vec3,
    a: Vec3,
    b: Vec3,
    c: Vec3,
) -> Option<f32> {
    const EPSILON: f32 = 1e-7;

    let edge1 = b - a;
    let edge2 = c - a;
    let h = direction.cross(edge2);
    let det = edge1.dot(h);
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(h) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(q) * inv_det;
    if t > EPSILON {
        Some(t)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barycentric_of_vertex_is_unit_weight() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(1.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 1.0, 0.0);
        let bc = barycentric_coordinates(a, a, b, c);
        assert!((bc.u - 1.0).abs() < 1e-5);
        assert!(bc.v.abs() < 1e-5);
        assert!(bc.w.abs() < 1e-5);
    }

    #[test]
    fn barycentric_of_centroid_is_even_thirds() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 3.0, 0.0);
        let centroid = (a + b + c) / 3.0;
        let bc = barycentric_coordinates(centroid, a, b, c);
        assert!((bc.u - 1.0 / 3.0).abs() < 1e-4);
        assert!((bc.v - 1.0 / 3.0).abs() < 1e-4);
        assert!((bc.w - 1.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn ray_hits_triangle_head_on() {
        let a = Vec3::new(-1.0, -1.0, 5.0);
        let b = Vec3::new(1.0, -1.0, 5.0);
        let c = Vec3::new(0.0, 1.0, 5.0);
        let hit = ray_triangle_intersect(Vec3::ZERO, Vec3::Z, a, b, c);
        assert!(hit.is_some());
        assert!((hit.unwrap() - 5.0).abs() < 1e-4);
    }

    #[test]
    fn ray_misses_triangle_outside_bounds() {
        let a = Vec3::new(-1.0, -1.0, 5.0);
        let b = Vec3::new(1.0, -1.0, 5.0);
        let c = Vec3::new(0.0, 1.0, 5.0);
        let hit = ray_triangle_intersect(Vec3::new(10.0, 10.0, 0.0), Vec3::Z, a, b, c);
        assert!(hit.is_none());
    }
}
