//! Coordinate systems, spherical positions, collision shapes, and the
//! mesh-query primitives (barycentric coordinates, a face BSP tree) that
//! the HRIR and ambisonics crates build on.

pub mod barycentric;
pub mod bsp;
pub mod coordinate;
pub mod shapes;
pub mod spherical;

pub use barycentric::{barycentric_coordinates, ray_triangle_intersect, Barycentric};
pub use bsp::{Face, FaceBspTree};
pub use coordinate::{Axis, CartesianCoordinateSystem, Converter};
pub use shapes::{BoxShape, CapsuleShape, ConeShape, Pose, Shape, SphereShape};
pub use spherical::SphericalPosition;
