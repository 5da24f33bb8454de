//! The `AMIR` head-related impulse response sphere asset: a triangulated
//! mesh of measurement directions, each carrying a stereo impulse response
//! pair, sampled by direction at spatialization time.

use amplitude_spatial::{barycentric_coordinates, ray_triangle_intersect, Face, FaceBspTree};
use glam::{Mat4, Vec3};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"AMIR";
/// Vertex positions aren't unit length; probing along a ray of this length
/// keeps the ray/face intersection well outside the mesh regardless of its
/// actual radius.
const PROBE_DISTANCE: f32 = 10.0;
/// Snap distance (in the same units as vertex positions) below which a
/// sampled direction is treated as landing exactly on a measured vertex.
const VERTEX_SNAP_EPSILON: f32 = 1e-5;

#[derive(Debug, Error)]
pub enum HrirError {
    #[error("not a valid AMIR file: bad magic")]
    BadMagic,
    #[error("unexpected end of file while reading {0}")]
    Truncated(&'static str),
    #[error("face index {0} is out of range for {1} vertices")]
    FaceIndexOutOfRange(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    Bilinear,
    NearestNeighbor,
}

#[derive(Debug, Clone, Copy)]
pub struct HrirHeader {
    pub version: u16,
    pub sample_rate: u32,
    pub ir_length: u32,
    pub vertex_count: u32,
    pub index_count: u32,
}

#[derive(Debug, Clone)]
pub struct HrirVertex {
    pub position: Vec3,
    pub left_ir: Vec<f32>,
    pub right_ir: Vec<f32>,
    pub left_delay: f32,
    pub right_delay: f32,
}

/// A loaded, queryable HRIR sphere.
pub struct HrirSphere {
    header: HrirHeader,
    vertices: Vec<HrirVertex>,
    faces: Vec<Face>,
    tree: FaceBspTree,
    sampling_mode: SamplingMode,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], HrirError> {
        if self.pos + len > self.data.len() {
            return Err(HrirError::Truncated(what));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16(&mut self, what: &'static str) -> Result<u16, HrirError> {
        Ok(u16::from_le_bytes(self.take(2, what)?.try_into().unwrap()))
    }

    fn read_u32(&mut self, what: &'static str) -> Result<u32, HrirError> {
        Ok(u32::from_le_bytes(self.take(4, what)?.try_into().unwrap()))
    }

    fn read_f32(&mut self, what: &'static str) -> Result<f32, HrirError> {
        Ok(f32::from_le_bytes(self.take(4, what)?.try_into().unwrap()))
    }

    fn read_f32_vec(&mut self, count: usize, what: &'static str) -> Result<Vec<f32>, HrirError> {
        let bytes = self.take(count * 4, what)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }
}

impl HrirSphere {
    /// Parses an in-memory `AMIR` file (magic, header, vertex table,
    /// per-vertex stereo IR + delay, then a flat triangle index list).
    pub fn parse(data: &[u8]) -> Result<Self, HrirError> {
        let mut cursor = Cursor::new(data);

        let magic = cursor.take(4, "magic")?;
        if magic != MAGIC {
            return Err(HrirError::BadMagic);
        }

        let header = HrirHeader {
            version: cursor.read_u16("version")?,
            sample_rate: cursor.read_u32("sample_rate")?,
            ir_length: cursor.read_u32("ir_length")?,
            vertex_count: cursor.read_u32("vertex_count")?,
            index_count: cursor.read_u32("index_count")?,
        };

        let mut indices = Vec::with_capacity(header.index_count as usize);
        for _ in 0..header.index_count {
            indices.push(cursor.read_u32("index")?);
        }

        let mut vertices = Vec::with_capacity(header.vertex_count as usize);
        let mut positions = Vec::with_capacity(header.vertex_count as usize);
        for _ in 0..header.vertex_count {
            let x = cursor.read_f32("vertex.x")?;
            let y = cursor.read_f32("vertex.y")?;
            let z = cursor.read_f32("vertex.z")?;
            let position = Vec3::new(x, y, z);

            let left_ir = cursor.read_f32_vec(header.ir_length as usize, "left_ir")?;
            let right_ir = cursor.read_f32_vec(header.ir_length as usize, "right_ir")?;
            let left_delay = cursor.read_f32("left_delay")?;
            let right_delay = cursor.read_f32("right_delay")?;

            positions.push(position);
            vertices.push(HrirVertex {
                position,
                left_ir,
                right_ir,
                left_delay,
                right_delay,
            });
        }

        let faces: Vec<Face> = indices
            .chunks_exact(3)
            .map(|c| {
                for &idx in c {
                    if idx >= header.vertex_count {
                        return Err(HrirError::FaceIndexOutOfRange(idx, header.vertex_count));
                    }
                }
                Ok(Face {
                    a: c[0] as usize,
                    b: c[1] as usize,
                    c: c[2] as usize,
                })
            })
            .collect::<Result<_, _>>()?;

        let tree = FaceBspTree::build(positions, faces.clone());

        Ok(Self {
            header,
            vertices,
            faces,
            tree,
            sampling_mode: SamplingMode::Bilinear,
        })
    }

    pub fn header(&self) -> &HrirHeader {
        &self.header
    }

    pub fn vertices(&self) -> &[HrirVertex] {
        &self.vertices
    }

    pub fn vertex(&self, index: usize) -> &HrirVertex {
        &self.vertices[index]
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.header.sample_rate
    }

    pub fn ir_length(&self) -> usize {
        self.header.ir_length as usize
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        self.sampling_mode
    }

    pub fn set_sampling_mode(&mut self, mode: SamplingMode) {
        self.sampling_mode = mode;
    }

    /// Applies a transform (e.g. a coordinate-system conversion) to every
    /// vertex position, rebuilding the query tree.
    pub fn transform(&mut self, matrix: Mat4) {
        let mut positions = Vec::with_capacity(self.vertices.len());
        for vertex in self.vertices.iter_mut() {
            vertex.position = matrix.transform_point3(vertex.position);
            positions.push(vertex.position);
        }
        self.tree = FaceBspTree::build(positions, self.faces.clone());
    }

    /// Samples the left/right impulse responses for `direction` (need not
    /// be normalized), writing `ir_length()` samples into each output
    /// slice.
    pub fn sample(&self, direction: Vec3, left: &mut [f32], right: &mut [f32]) {
        match self.sampling_mode {
            SamplingMode::Bilinear => self.sample_bilinear(direction, left, right),
            SamplingMode::NearestNeighbor => self.sample_nearest(direction, left, right),
        }
    }

    fn closest_vertex(&self, direction: Vec3, face: &Face) -> Option<&HrirVertex> {
        let k2 = VERTEX_SNAP_EPSILON * VERTEX_SNAP_EPSILON;
        for &idx in &[face.a, face.b, face.c] {
            let v = &self.vertices[idx];
            if (v.position - direction).length_squared() < k2 {
                return Some(v);
            }
        }
        None
    }

    fn sample_bilinear(&self, direction: Vec3, left: &mut [f32], right: &mut [f32]) {
        let probe = direction * PROBE_DISTANCE;
        let Some((face, _)) = self.tree.find_face(probe) else {
            return;
        };

        if let Some(vertex) = self.closest_vertex(direction, &face) {
            copy_ir(vertex, left, right);
            return;
        }

        let a = &self.vertices[face.a];
        let b = &self.vertices[face.b];
        let c = &self.vertices[face.c];

        let Some(_) = ray_triangle_intersect(Vec3::ZERO, probe, a.position, b.position, c.position)
        else {
            return;
        };
        let bc = barycentric_coordinates(probe, a.position, b.position, c.position);

        let n = left.len().min(a.left_ir.len());
        for i in 0..n {
            left[i] = a.left_ir[i] * bc.u + b.left_ir[i] * bc.v + c.left_ir[i] * bc.w;
            right[i] = a.right_ir[i] * bc.u + b.right_ir[i] * bc.v + c.right_ir[i] * bc.w;
        }
    }

    fn sample_nearest(&self, direction: Vec3, left: &mut [f32], right: &mut [f32]) {
        let probe = direction * PROBE_DISTANCE;
        let Some((face, _)) = self.tree.find_face(probe) else {
            return;
        };

        if let Some(vertex) = self.closest_vertex(direction, &face) {
            copy_ir(vertex, left, right);
            return;
        }

        let a = &self.vertices[face.a];
        let b = &self.vertices[face.b];
        let c = &self.vertices[face.c];

        let Some(_) = ray_triangle_intersect(Vec3::ZERO, probe, a.position, b.position, c.position)
        else {
            return;
        };
        let bc = barycentric_coordinates(probe, a.position, b.position, c.position);

        let nearest = if bc.u >= bc.v && bc.u >= bc.w {
            a
        } else if bc.v >= bc.w {
            b
        } else {
            c
        };
        copy_ir(nearest, left, right);
    }
}

fn copy_ir(vertex: &HrirVertex, left: &mut [f32], right: &mut [f32]) {
    let n = left.len().min(vertex.left_ir.len());
    left[..n].copy_from_slice(&vertex.left_ir[..n]);
    let n = right.len().min(vertex.right_ir.len());
    right[..n].copy_from_slice(&vertex.right_ir[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_amir(vertices: &[(Vec3, Vec<f32>, Vec<f32>, f32, f32)], indices: &[u32]) -> Vec<u8> {
        let ir_length = vertices.first().map_or(0, |v| v.1.len());
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&48_000u32.to_le_bytes());
        out.extend_from_slice(&(ir_length as u32).to_le_bytes());
        out.extend_from_slice(&(vertices.len() as u32).to_le_bytes());
        out.extend_from_slice(&(indices.len() as u32).to_le_bytes());
        for &i in indices {
            out.extend_from_slice(&i.to_le_bytes());
        }
        for (pos, left, right, ld, rd) in vertices {
            out.extend_from_slice(&pos.x.to_le_bytes());
            out.extend_from_slice(&pos.y.to_le_bytes());
            out.extend_from_slice(&pos.z.to_le_bytes());
            for s in left {
                out.extend_from_slice(&s.to_le_bytes());
            }
            for s in right {
                out.extend_from_slice(&s.to_le_bytes());
            }
            out.extend_from_slice(&ld.to_le_bytes());
            out.extend_from_slice(&rd.to_le_bytes());
        }
        out
    }

    fn octahedron_bytes() -> Vec<u8> {
        let dirs = [
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ];
        let vertices: Vec<_> = dirs
            .iter()
            .enumerate()
            .map(|(i, &d)| (d, vec![i as f32; 4], vec![-(i as f32); 4], 0.0, 0.0))
            .collect();
        let indices = [
            0, 2, 4, 2, 1, 4, 1, 3, 4, 3, 0, 4, 2, 0, 5, 1, 2, 5, 3, 1, 5, 0, 3, 5,
        ];
        write_amir(&vertices, &indices)
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"NOPE".to_vec();
        assert!(matches!(HrirSphere::parse(&bytes), Err(HrirError::BadMagic)));
    }

    #[test]
    fn parses_header_fields() {
        let bytes = octahedron_bytes();
        let sphere = HrirSphere::parse(&bytes).unwrap();
        assert_eq!(sphere.sample_rate(), 48_000);
        assert_eq!(sphere.ir_length(), 4);
        assert_eq!(sphere.vertex_count(), 6);
        assert_eq!(sphere.face_count(), 8);
    }

    #[test]
    fn sampling_exact_vertex_returns_its_own_ir() {
        let bytes = octahedron_bytes();
        let sphere = HrirSphere::parse(&bytes).unwrap();
        let mut left = vec![0.0; 4];
        let mut right = vec![0.0; 4];
        sphere.sample(Vec3::X, &mut left, &mut right);
        assert_eq!(left, vec![0.0; 4]);
        assert_eq!(right, vec![0.0; 4]);
    }

    #[test]
    fn nearest_neighbor_mode_picks_a_measured_vertex() {
        let bytes = octahedron_bytes();
        let mut sphere = HrirSphere::parse(&bytes).unwrap();
        sphere.set_sampling_mode(SamplingMode::NearestNeighbor);
        let mut left = vec![0.0; 4];
        let mut right = vec![0.0; 4];
        sphere.sample(Vec3::new(1.0, 1.0, 1.0), &mut left, &mut right);
        let matches_some_vertex = sphere
            .vertices()
            .iter()
            .any(|v| v.left_ir == left && v.right_ir == right);
        assert!(matches_some_vertex);
    }
}
