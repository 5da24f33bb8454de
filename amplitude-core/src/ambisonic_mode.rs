//! The panning modes a channel can render through, and the per-channel
//! spatialization level that selects whether a channel even reaches the
//! panner.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spatialization {
    None,
    Position,
    PositionOrientation,
    Hrtf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PanningMode {
    Stereo,
    BinauralLowQuality,
    BinauralMediumQuality,
    BinauralHighQuality,
    Hrtf,
}

impl PanningMode {
    /// Ambisonic order used to encode a source when this mode routes
    /// through the B-format path; `None` for the modes that bypass it.
    pub fn ambisonic_order(self) -> Option<u32> {
        match self {
            PanningMode::BinauralLowQuality => Some(1),
            PanningMode::BinauralMediumQuality => Some(2),
            PanningMode::BinauralHighQuality => Some(3),
            PanningMode::Stereo | PanningMode::Hrtf => None,
        }
    }

    pub fn speaker_preset(self) -> Option<amplitude_ambisonics::SpeakerArrayPreset> {
        match self {
            PanningMode::BinauralLowQuality => Some(amplitude_ambisonics::SpeakerArrayPreset::Cube),
            PanningMode::BinauralMediumQuality => Some(amplitude_ambisonics::SpeakerArrayPreset::Dodecahedron),
            PanningMode::BinauralHighQuality => Some(amplitude_ambisonics::SpeakerArrayPreset::Lebedev26),
            PanningMode::Stereo | PanningMode::Hrtf => None,
        }
    }
}
