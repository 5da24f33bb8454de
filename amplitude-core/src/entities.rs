//! Positioned objects keyed by caller-supplied ids: listeners, entities,
//! environments, and rooms.

use glam::Vec3;

use amplitude_spatial::shapes::BoxShape;

#[derive(Debug, Clone, Copy)]
pub struct Orientation {
    pub forward: Vec3,
    pub up: Vec3,
}

impl Default for Orientation {
    fn default() -> Self {
        Self {
            forward: Vec3::Y,
            up: Vec3::Z,
        }
    }
}

/// Tracks position history to derive velocity from successive updates, the
/// way both `Listener` and `Entity` do in the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct Positioned {
    pub position: Vec3,
    pub orientation: Orientation,
    pub velocity: Vec3,
}

impl Positioned {
    pub fn set_position(&mut self, position: Vec3, dt: f32) {
        if dt > 0.0 {
            self.velocity = (position - self.position) / dt;
        }
        self.position = position;
    }
}

pub struct Listener {
    pub id: u64,
    pub state: Positioned,
}

pub struct Entity {
    pub id: u64,
    pub state: Positioned,
}

/// A caller-defined occlusion/obstruction environment factor, scoped to an
/// entity/room pair.
pub struct Environment {
    pub id: u64,
    pub factor: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct WallMaterial {
    /// Absorption coefficient per octave band (9 bands, as in the source).
    pub absorption: [f32; 9],
}

impl Default for WallMaterial {
    fn default() -> Self {
        Self { absorption: [0.1; 9] }
    }
}

pub struct Room {
    pub id: u64,
    pub shape: BoxShape,
    pub walls: [WallMaterial; 6],
    pub cutoff_frequency: f32,
    pub reflections_gain: f32,
}

impl Room {
    pub fn new(id: u64, shape: BoxShape) -> Self {
        Self {
            id,
            shape,
            walls: [WallMaterial::default(); 6],
            cutoff_frequency: 5_000.0,
            reflections_gain: 0.0,
        }
    }

    /// Mean absorption across all walls and bands, used to scale the
    /// reflections bus send.
    pub fn mean_absorption(&self) -> f32 {
        let total: f32 = self.walls.iter().flat_map(|w| w.absorption.iter()).sum();
        total / (self.walls.len() * 9) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_position_derives_velocity_from_delta() {
        let mut p = Positioned::default();
        p.set_position(Vec3::new(1.0, 0.0, 0.0), 0.5);
        assert!((p.velocity.x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn room_mean_absorption_averages_across_walls_and_bands() {
        let shape = BoxShape::new(1.0, 1.0, 1.0);
        let room = Room::new(1, shape);
        assert!((room.mean_absorption() - 0.1).abs() < 1e-6);
    }
}
