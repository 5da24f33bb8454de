//! In-memory engine configuration blob. The host constructs one and passes
//! it to `Engine::initialize`; the core never touches the filesystem for
//! configuration itself, only for the assets named inside it.

use serde::{Deserialize, Serialize};

use crate::ambisonic_mode::PanningMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HrirSamplingMode {
    Bilinear,
    NearestNeighbor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstructionConfig {
    pub low_pass_curve: Vec<(f32, f32)>,
    pub gain_curve: Vec<(f32, f32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcclusionConfig {
    pub low_pass_curve: Vec<(f32, f32)>,
    pub gain_curve: Vec<(f32, f32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub output_sample_rate: u32,
    pub frames_per_buffer: usize,
    pub max_channels: usize,
    pub listeners_capacity: usize,
    pub entities_capacity: usize,
    pub environments_capacity: usize,
    pub rooms_capacity: usize,
    pub sound_speed: f32,
    pub doppler_factor: f32,
    pub panning_mode: PanningMode,
    pub hrir_sampling_mode: HrirSamplingMode,
    pub hrir_sphere_path: Option<String>,
    pub obstruction_config: ObstructionConfig,
    pub occlusion_config: OcclusionConfig,
    pub pipeline_id: u64,
    pub buses_blob: Vec<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 48_000,
            frames_per_buffer: 512,
            max_channels: 32,
            listeners_capacity: 4,
            entities_capacity: 256,
            environments_capacity: 16,
            rooms_capacity: 16,
            sound_speed: 343.0,
            doppler_factor: 1.0,
            panning_mode: PanningMode::Stereo,
            hrir_sampling_mode: HrirSamplingMode::Bilinear,
            hrir_sphere_path: None,
            obstruction_config: ObstructionConfig {
                low_pass_curve: vec![(0.0, 22_000.0), (1.0, 500.0)],
                gain_curve: vec![(0.0, 1.0), (1.0, 0.3)],
            },
            occlusion_config: OcclusionConfig {
                low_pass_curve: vec![(0.0, 22_000.0), (1.0, 200.0)],
                gain_curve: vec![(0.0, 1.0), (1.0, 0.1)],
            },
            pipeline_id: 0,
            buses_blob: Vec::new(),
        }
    }
}
