//! A binary space partition over a triangulated sphere, used to resolve a
//! listener direction to the HRIR mesh face it falls within in roughly
//! `O(log n)` instead of a linear scan over every face.

use crate::barycentric::{barycentric_coordinates, Barycentric};
use glam::Vec3;

/// One triangular face, referencing vertex positions owned by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Face {
    pub a: usize,
    pub b: usize,
    pub c: usize,
}

enum Node {
    Leaf(usize),
    Split {
        normal: Vec3,
        face: usize,
        front: Box<Node>,
        back: Box<Node>,
    },
}

/// A BSP tree over a closed triangle mesh centered at the origin (e.g. a
/// unit sphere of HRIR sample directions). Queries resolve a direction
/// vector to the face whose solid angle it falls in.
pub struct FaceBspTree {
    root: Node,
    faces: Vec<Face>,
    vertices: Vec<Vec3>,
}

impl FaceBspTree {
    pub fn build(vertices: Vec<Vec3>, faces: Vec<Face>) -> Self {
        let indices: Vec<usize> = (0..faces.len()).collect();
        let root = Self::build_node(&vertices, &faces, indices);
        Self {
            root,
            faces,
            vertices,
        }
    }

    fn build_node(vertices: &[Vec3], faces: &[Face], indices: Vec<usize>) -> Node {
        if indices.len() == 1 {
            return Node::Leaf(indices[0]);
        }
        if indices.is_empty() {
            // Should not happen for a non-empty mesh; fall back to a
            // degenerate leaf pointing at face 0 rather than panicking.
            return Node::Leaf(0);
        }

        let splitter = indices[0];
        let face = faces[splitter];
        let centroid = (vertices[face.a] + vertices[face.b] + vertices[face.c]) / 3.0;
        let normal = centroid.normalize_or_zero();

        let mut front = Vec::new();
        let mut back = Vec::new();
        for &idx in indices.iter().skip(1) {
            let f = faces[idx];
            let c = (vertices[f.a] + vertices[f.b] + vertices[f.c]) / 3.0;
            if c.dot(normal) >= 0.0 {
                front.push(idx);
            } else {
                back.push(idx);
            }
        }

        // Degenerate split (every remaining face landed on one side):
        // stop partitioning and fan them out as a flat leaf list by
        // nesting them behind a trivial always-front split.
        if front.is_empty() || back.is_empty() {
            let mut all = front;
            all.extend(back);
            if all.is_empty() {
                return Node::Leaf(splitter);
            }
            return Node::Split {
                normal,
                face: splitter,
                front: Box::new(Self::build_node(vertices, faces, all)),
                back: Box::new(Node::Leaf(splitter)),
            };
        }

        Node::Split {
            normal,
            face: splitter,
            front: Box::new(Self::build_node(vertices, faces, front)),
            back: Box::new(Self::build_node(vertices, faces, back)),
        }
    }

    /// Finds the face whose solid angle contains `direction`, along with
    /// the barycentric weights of the ray/face intersection. Falls back to
    /// a brute-force scan if the BSP descent lands on a face that
    /// (numerically) doesn't actually contain the projected direction.
    pub fn find_face(&self, direction: Vec3) -> Option<(Face, Barycentric)> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }

        if let Some(result) = self.descend(&self.root, direction) {
            return Some(result);
        }
        self.brute_force(direction)
    }

    fn descend(&self, node: &Node, direction: Vec3) -> Option<(Face, Barycentric)> {
        match node {
            Node::Leaf(idx) => self.check_face(*idx, direction),
            Node::Split {
                normal,
                face,
                front,
                back,
            } => {
                if let Some(result) = self.check_face(*face, direction) {
                    return Some(result);
                }
                let side = if direction.dot(*normal) >= 0.0 {
                    &front
                } else {
                    &back
                };
                self.descend(side, direction)
            }
        }
    }

    fn check_face(&self, idx: usize, direction: Vec3) -> Option<(Face, Barycentric)> {
        let face = self.faces[idx];
        let a = self.vertices[face.a];
        let b = self.vertices[face.b];
        let c = self.vertices[face.c];
        let bc = barycentric_coordinates(direction * a.length().max(b.length()).max(c.length()), a, b, c);
        if bc.is_inside() {
            Some((face, bc))
        } else {
            None
        }
    }

    fn brute_force(&self, direction: Vec3) -> Option<(Face, Barycentric)> {
        let mut best: Option<(Face, Barycentric, f32)> = None;
        for &face in &self.faces {
            let a = self.vertices[face.a];
            let b = self.vertices[face.b];
            let c = self.vertices[face.c];
            let scale = a.length().max(b.length()).max(c.length());
            let bc = barycentric_coordinates(direction * scale, a, b, c);
            let penalty = (-bc.u).max(0.0) + (-bc.v).max(0.0) + (-bc.w).max(0.0);
            if best.as_ref().map_or(true, |(_, _, p)| penalty < *p) {
                best = Some((face, bc, penalty));
            }
        }
        best.map(|(f, bc, _)| (f, bc))
    }

    pub fn vertex(&self, index: usize) -> Vec3 {
        self.vertices[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn octahedron() -> (Vec<Vec3>, Vec<Face>) {
        let vertices = vec![
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ];
        let faces = vec![
            Face { a: 0, b: 2, c: 4 },
            Face { a: 2, b: 1, c: 4 },
            Face { a: 1, b: 3, c: 4 },
            Face { a: 3, b: 0, c: 4 },
            Face { a: 2, b: 0, c: 5 },
            Face { a: 1, b: 2, c: 5 },
            Face { a: 3, b: 1, c: 5 },
            Face { a: 0, b: 3, c: 5 },
        ];
        (vertices, faces)
    }

    #[test]
    fn finds_face_for_vertex_direction() {
        let (vertices, faces) = octahedron();
        let tree = FaceBspTree::build(vertices, faces);
        let result = tree.find_face(Vec3::X);
        assert!(result.is_some());
    }

    #[test]
    fn finds_face_for_arbitrary_direction() {
        let (vertices, faces) = octahedron();
        let tree = FaceBspTree::build(vertices, faces);
        let result = tree.find_face(Vec3::new(1.0, 1.0, 1.0));
        assert!(result.is_some());
        let (_, bc) = result.unwrap();
        assert!(bc.is_inside());
    }
}
