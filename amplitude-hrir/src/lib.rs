//! Parsing and direction-based sampling of `AMIR` HRIR sphere assets.

pub mod sphere;

pub use sphere::{HrirError, HrirHeader, HrirSphere, HrirVertex, SamplingMode};
