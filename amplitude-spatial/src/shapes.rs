//! Collision shapes used by zones, attenuation cones, and effects volumes.

use glam::{Mat4, Vec3};

/// Position and orientation shared by every shape. The look-at matrix is
/// rebuilt lazily from `position`/`direction`/`up` by whichever shape owns
/// it, since only the concrete shapes know which of their own cached
/// quantities the pose touches.
#[derive(Debug, Clone, Copy)]
pub struct Pose {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
}

impl Pose {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            direction: Vec3::Y,
            up: Vec3::Z,
        }
    }

    pub fn look_at(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.direction, self.up)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new(Vec3::ZERO)
    }
}

/// Common shape surface: containment, nearest-surface-point, and signed
/// distance (negative when `point` is inside).
pub trait Shape {
    fn pose(&self) -> &Pose;
    fn pose_mut(&mut self) -> &mut Pose;
    fn contains(&self, point: Vec3) -> bool;
    fn closest_point(&self, point: Vec3) -> Vec3;

    fn shortest_distance_to_edge(&self, point: Vec3) -> f32 {
        (self.closest_point(point) - point).length()
    }

    fn set_position(&mut self, position: Vec3) {
        self.pose_mut().position = position;
    }

    fn set_orientation(&mut self, direction: Vec3, up: Vec3) {
        let pose = self.pose_mut();
        pose.direction = direction;
        pose.up = up;
    }
}

/// An oriented box defined by its three half-extents. Recomputes its
/// cached local axes and projected extents only when `dirty`, which every
/// mutator sets.
pub struct BoxShape {
    pose: Pose,
    half_width: f32,
    half_height: f32,
    half_depth: f32,
    dirty: bool,
    basis: [Vec3; 3],
    min_proj: Vec3,
    max_proj: Vec3,
}

impl BoxShape {
    pub fn new(half_width: f32, half_height: f32, half_depth: f32) -> Self {
        Self {
            pose: Pose::default(),
            half_width,
            half_height,
            half_depth,
            dirty: true,
            basis: [Vec3::X, Vec3::Y, Vec3::Z],
            min_proj: Vec3::ZERO,
            max_proj: Vec3::ZERO,
        }
    }

    pub fn half_width(&self) -> f32 {
        self.half_width
    }

    pub fn half_height(&self) -> f32 {
        self.half_height
    }

    pub fn half_depth(&self) -> f32 {
        self.half_depth
    }

    pub fn width(&self) -> f32 {
        self.half_width * 2.0
    }

    pub fn height(&self) -> f32 {
        self.half_height * 2.0
    }

    pub fn depth(&self) -> f32 {
        self.half_depth * 2.0
    }

    pub fn set_half_width(&mut self, value: f32) {
        self.half_width = value;
        self.dirty = true;
    }

    pub fn set_half_height(&mut self, value: f32) {
        self.half_height = value;
        self.dirty = true;
    }

    pub fn set_half_depth(&mut self, value: f32) {
        self.half_depth = value;
        self.dirty = true;
    }

    fn refresh(&mut self) {
        if !self.dirty {
            return;
        }
        let right = self.pose.look_at().transform_vector3(Vec3::X).normalize_or_zero();
        let up = self.pose.up.normalize_or_zero();
        let forward = self.pose.direction.normalize_or_zero();
        self.basis = [right, forward, up];
        self.min_proj = -Vec3::new(self.half_width, self.half_depth, self.half_height);
        self.max_proj = Vec3::new(self.half_width, self.half_depth, self.half_height);
        self.dirty = false;
    }

    fn local_coords(&self, point: Vec3) -> Vec3 {
        let local = point - self.pose.position;
        Vec3::new(
            local.dot(self.basis[0]),
            local.dot(self.basis[1]),
            local.dot(self.basis[2]),
        )
    }
}

impl Shape for BoxShape {
    fn pose(&self) -> &Pose {
        &self.pose
    }

    fn pose_mut(&mut self) -> &mut Pose {
        self.dirty = true;
        &mut self.pose
    }

    fn contains(&self, point: Vec3) -> bool {
        let mut this = self.clone_for_query();
        this.refresh();
        let local = this.local_coords(point);
        local.x >= this.min_proj.x
            && local.x <= this.max_proj.x
            && local.y >= this.min_proj.y
            && local.y <= this.max_proj.y
            && local.z >= this.min_proj.z
            && local.z <= this.max_proj.z
    }

    fn closest_point(&self, point: Vec3) -> Vec3 {
        let mut this = self.clone_for_query();
        this.refresh();
        let local = this.local_coords(point);
        let clamped = local.clamp(this.min_proj, this.max_proj);
        this.pose.position
            + this.basis[0] * clamped.x
            + this.basis[1] * clamped.y
            + this.basis[2] * clamped.z
    }
}

impl BoxShape {
    /// Shapes cache derived state behind `&mut self`; queries take `&self`
    /// per the [`Shape`] trait, so refresh a private scratch copy instead.
    fn clone_for_query(&self) -> Self {
        Self {
            pose: self.pose,
            half_width: self.half_width,
            half_height: self.half_height,
            half_depth: self.half_depth,
            dirty: self.dirty,
            basis: self.basis,
            min_proj: self.min_proj,
            max_proj: self.max_proj,
        }
    }
}

pub struct SphereShape {
    pose: Pose,
    radius: f32,
}

impl SphereShape {
    pub fn new(radius: f32) -> Self {
        Self {
            pose: Pose::default(),
            radius,
        }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn diameter(&self) -> f32 {
        self.radius * 2.0
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }
}

impl Shape for SphereShape {
    fn pose(&self) -> &Pose {
        &self.pose
    }

    fn pose_mut(&mut self) -> &mut Pose {
        &mut self.pose
    }

    fn contains(&self, point: Vec3) -> bool {
        (point - self.pose.position).length() <= self.radius
    }

    fn closest_point(&self, point: Vec3) -> Vec3 {
        let offset = point - self.pose.position;
        let distance = offset.length();
        if distance <= self.radius {
            return point;
        }
        self.pose.position + offset.normalize_or_zero() * self.radius
    }
}

pub struct CapsuleShape {
    pose: Pose,
    radius: f32,
    half_height: f32,
}

impl CapsuleShape {
    pub fn new(radius: f32, half_height: f32) -> Self {
        Self {
            pose: Pose::default(),
            radius,
            half_height,
        }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn half_height(&self) -> f32 {
        self.half_height
    }

    pub fn diameter(&self) -> f32 {
        self.radius * 2.0
    }

    pub fn height(&self) -> f32 {
        self.half_height * 2.0
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }

    pub fn set_half_height(&mut self, half_height: f32) {
        self.half_height = half_height;
    }

    fn segment(&self) -> (Vec3, Vec3) {
        let axis = self.pose.up.normalize_or_zero();
        let half = (self.half_height - self.radius).max(0.0);
        (
            self.pose.position + axis * half,
            self.pose.position - axis * half,
        )
    }

    fn closest_point_on_segment(&self, point: Vec3) -> Vec3 {
        let (a, b) = self.segment();
        let ab = b - a;
        let len_sq = ab.length_squared();
        if len_sq < 1e-12 {
            return a;
        }
        let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
        a + ab * t
    }
}

impl Shape for CapsuleShape {
    fn pose(&self) -> &Pose {
        &self.pose
    }

    fn pose_mut(&mut self) -> &mut Pose {
        &mut self.pose
    }

    fn contains(&self, point: Vec3) -> bool {
        let nearest = self.closest_point_on_segment(point);
        (point - nearest).length() <= self.radius
    }

    fn closest_point(&self, point: Vec3) -> Vec3 {
        let nearest = self.closest_point_on_segment(point);
        let offset = point - nearest;
        let distance = offset.length();
        if distance <= self.radius {
            return point;
        }
        nearest + offset.normalize_or_zero() * self.radius
    }
}

pub struct ConeShape {
    pose: Pose,
    radius: f32,
    height: f32,
}

impl ConeShape {
    pub fn new(radius: f32, height: f32) -> Self {
        Self {
            pose: Pose::default(),
            radius,
            height,
        }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn diameter(&self) -> f32 {
        self.radius * 2.0
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }

    pub fn set_height(&mut self, height: f32) {
        self.height = height;
    }
}

impl Shape for ConeShape {
    fn pose(&self) -> &Pose {
        &self.pose
    }

    fn pose_mut(&mut self) -> &mut Pose {
        &mut self.pose
    }

    fn contains(&self, point: Vec3) -> bool {
        let axis = self.pose.direction.normalize_or_zero();
        let to_point = point - self.pose.position;
        let axial_distance = to_point.dot(axis);
        if axial_distance < 0.0 || axial_distance > self.height {
            return false;
        }
        let cone_radius = axial_distance / self.height.max(1e-6) * self.radius;
        let radial = (to_point - axis * axial_distance).length();
        radial <= cone_radius
    }

    fn closest_point(&self, point: Vec3) -> Vec3 {
        let axis = self.pose.direction.normalize_or_zero();
        let to_point = point - self.pose.position;
        let axial_distance = to_point.dot(axis).clamp(0.0, self.height);
        let cone_radius = axial_distance / self.height.max(1e-6) * self.radius;
        let radial_vec = to_point - axis * axial_distance;
        let radial_len = radial_vec.length();
        let clamped_radial = if radial_len > cone_radius {
            radial_vec.normalize_or_zero() * cone_radius
        } else {
            radial_vec
        };
        self.pose.position + axis * axial_distance + clamped_radial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_contains_center() {
        let mut s = SphereShape::new(2.0);
        s.set_position(Vec3::new(1.0, 1.0, 1.0));
        assert!(s.contains(Vec3::new(1.0, 1.0, 1.0)));
        assert!(!s.contains(Vec3::new(10.0, 1.0, 1.0)));
    }

    #[test]
    fn sphere_closest_point_is_on_surface_when_outside() {
        let s = SphereShape::new(2.0);
        let p = s.closest_point(Vec3::new(10.0, 0.0, 0.0));
        assert!((p.length() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn box_contains_origin_by_default() {
        let b = BoxShape::new(1.0, 1.0, 1.0);
        assert!(b.contains(Vec3::ZERO));
        assert!(!b.contains(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn capsule_contains_points_near_axis() {
        let mut c = CapsuleShape::new(1.0, 3.0);
        c.set_orientation(Vec3::Y, Vec3::Z);
        assert!(c.contains(Vec3::new(0.0, 0.0, 0.0)));
        assert!(c.contains(Vec3::new(0.5, 0.0, 2.0)));
        assert!(!c.contains(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn cone_excludes_points_behind_apex() {
        let mut cone = ConeShape::new(1.0, 4.0);
        cone.set_orientation(Vec3::Y, Vec3::Z);
        assert!(!cone.contains(Vec3::new(0.0, -1.0, 0.0)));
        assert!(cone.contains(Vec3::new(0.0, 2.0, 0.0)));
    }
}
