//! Decodes a B-format soundfield onto a loudspeaker (or virtual speaker)
//! array.

use crate::bformat::channel_basis;

/// A speaker position, in radians, using the same azimuth/elevation
/// convention as [`channel_basis`].
#[derive(Debug, Clone, Copy)]
pub struct SpeakerDirection {
    pub azimuth: f32,
    pub elevation: f32,
}

impl SpeakerDirection {
    pub fn new(azimuth: f32, elevation: f32) -> Self {
        Self { azimuth, elevation }
    }
}

/// A named, commonly used virtual or physical speaker layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerArrayPreset {
    Stereo,
    Surround51,
    Surround71,
    Cube,
    Dodecahedron,
    Lebedev26,
}

fn deg(d: f32) -> f32 {
    d.to_radians()
}

impl SpeakerArrayPreset {
    pub fn directions(self) -> Vec<SpeakerDirection> {
        match self {
            SpeakerArrayPreset::Stereo => vec![
                SpeakerDirection::new(deg(30.0), 0.0),
                SpeakerDirection::new(deg(-30.0), 0.0),
            ],
            SpeakerArrayPreset::Surround51 => vec![
                SpeakerDirection::new(deg(30.0), 0.0),
                SpeakerDirection::new(deg(-30.0), 0.0),
                SpeakerDirection::new(deg(0.0), 0.0),
                SpeakerDirection::new(deg(180.0), 0.0),
                SpeakerDirection::new(deg(110.0), 0.0),
                SpeakerDirection::new(deg(-110.0), 0.0),
            ],
            SpeakerArrayPreset::Surround71 => vec![
                SpeakerDirection::new(deg(30.0), 0.0),
                SpeakerDirection::new(deg(-30.0), 0.0),
                SpeakerDirection::new(deg(0.0), 0.0),
                SpeakerDirection::new(deg(180.0), 0.0),
                SpeakerDirection::new(deg(90.0), 0.0),
                SpeakerDirection::new(deg(-90.0), 0.0),
                SpeakerDirection::new(deg(150.0), 0.0),
                SpeakerDirection::new(deg(-150.0), 0.0),
            ],
            SpeakerArrayPreset::Cube => {
                let mut dirs = Vec::with_capacity(8);
                for &az in &[45.0, 135.0, -135.0, -45.0] {
                    for &el in &[35.264, -35.264] {
                        dirs.push(SpeakerDirection::new(deg(az), deg(el)));
                    }
                }
                dirs
            }
            SpeakerArrayPreset::Dodecahedron => {
                // 20 vertices of a regular dodecahedron, expressed as
                // azimuth/elevation pairs derived from its vertex set.
                let phi = (1.0 + 5f32.sqrt()) / 2.0;
                let mut vertices = Vec::with_capacity(20);
                for &sx in &[-1.0f32, 1.0] {
                    for &sy in &[-1.0f32, 1.0] {
                        for &sz in &[-1.0f32, 1.0] {
                            vertices.push((sx, sy, sz));
                        }
                    }
                }
                for &s1 in &[-1.0f32, 1.0] {
                    for &s2 in &[-1.0f32, 1.0] {
                        vertices.push((0.0, s1 / phi, s2 * phi));
                        vertices.push((s1 / phi, s2 * phi, 0.0));
                        vertices.push((s1 * phi, 0.0, s2 / phi));
                    }
                }
                vertices
                    .into_iter()
                    .map(|(x, y, z)| cartesian_to_direction(x, y, z))
                    .collect()
            }
            SpeakerArrayPreset::Lebedev26 => {
                // 26-point Lebedev quadrature grid: 6 axis points, 8
                // octant diagonals, 12 edge midpoints.
                let mut vertices = Vec::with_capacity(26);
                for &axis in &[(1.0, 0.0, 0.0), (-1.0, 0.0, 0.0), (0.0, 1.0, 0.0), (0.0, -1.0, 0.0), (0.0, 0.0, 1.0), (0.0, 0.0, -1.0)] {
                    vertices.push(axis);
                }
                let d = 1.0 / 3f32.sqrt();
                for &sx in &[-1.0f32, 1.0] {
                    for &sy in &[-1.0f32, 1.0] {
                        for &sz in &[-1.0f32, 1.0] {
                            vertices.push((sx * d, sy * d, sz * d));
                        }
                    }
                }
                let e = 1.0 / 2f32.sqrt();
                for &sx in &[-1.0f32, 1.0] {
                    for &sy in &[-1.0f32, 1.0] {
                        vertices.push((sx * e, sy * e, 0.0));
                        vertices.push((sx * e, 0.0, sy * e));
                        vertices.push((0.0, sx * e, sy * e));
                    }
                }
                vertices
                    .into_iter()
                    .map(|(x, y, z)| cartesian_to_direction(x, y, z))
                    .collect()
            }
        }
    }
}

fn cartesian_to_direction(x: f32, y: f32, z: f32) -> SpeakerDirection {
    let r = (x * x + y * y + z * z).sqrt().max(1e-8);
    SpeakerDirection::new(y.atan2(x), (z / r).clamp(-1.0, 1.0).asin())
}

/// A decode matrix: `gains[speaker][channel]`, built for a fixed order
/// and speaker layout.
pub struct AmbisonicDecoder {
    channel_count: usize,
    speakers: Vec<SpeakerDirection>,
    gains: Vec<Vec<f32>>,
}

impl AmbisonicDecoder {
    /// Builds a sampling decoder (each speaker re-samples the encoded
    /// soundfield in its own direction), row-normalized by speaker count
    /// so overall loudness doesn't grow with the array size.
    pub fn new(order: u32, is_3d: bool, speakers: Vec<SpeakerDirection>) -> Self {
        let channel_count = crate::bformat::component_count(order, is_3d);
        let norm = 1.0 / (speakers.len().max(1) as f32);
        let gains = speakers
            .iter()
            .map(|s| {
                (0..channel_count)
                    .map(|c| channel_basis(c, s.azimuth, s.elevation) * norm)
                    .collect()
            })
            .collect();
        Self {
            channel_count,
            speakers,
            gains,
        }
    }

    pub fn from_preset(order: u32, is_3d: bool, preset: SpeakerArrayPreset) -> Self {
        Self::new(order, is_3d, preset.directions())
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn speakers(&self) -> &[SpeakerDirection] {
        &self.speakers
    }

    /// Decodes one frame across all speakers, given one sample per
    /// B-format channel.
    pub fn decode_frame(&self, channel_samples: &[f32], out: &mut [f32]) {
        for (speaker, gains) in self.gains.iter().enumerate() {
            let mut acc = 0.0;
            for (c, &g) in gains.iter().enumerate() {
                acc += g * channel_samples.get(c).copied().unwrap_or(0.0);
            }
            out[speaker] = acc;
        }
    }

    /// Decodes a full block: `channels[c]` is one B-format channel's
    /// buffer, `out[speaker]` receives the decoded speaker feed.
    pub fn decode_block(&self, channels: &[Vec<f32>], out: &mut [Vec<f32>]) {
        let frames = channels.first().map_or(0, |c| c.len());
        for frame in 0..frames {
            let samples: Vec<f32> = channels.iter().map(|c| c[frame]).collect();
            let mut frame_out = vec![0.0; out.len()];
            self.decode_frame(&samples, &mut frame_out);
            for (speaker_channel, &v) in frame_out.iter().enumerate() {
                out[speaker_channel][frame] = v;
            }
        }
    }
}

/// A minimal fixed decoder for two-channel (stereo, non-headphone) output,
/// independent of speaker angle: just `W` plus a scaled `X`.
pub const STEREO_DECODER_COEFFICIENTS: [[f32; 2]; 2] =
    [[0.5, 0.5 / 3.0], [0.5, -0.5 / 3.0]];

pub fn decode_stereo_frame(w: f32, x: f32) -> (f32, f32) {
    let left = STEREO_DECODER_COEFFICIENTS[0][0] * w + STEREO_DECODER_COEFFICIENTS[0][1] * x;
    let right = STEREO_DECODER_COEFFICIENTS[1][0] * w + STEREO_DECODER_COEFFICIENTS[1][1] * x;
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_preset_has_two_speakers() {
        let decoder = AmbisonicDecoder::from_preset(1, true, SpeakerArrayPreset::Stereo);
        assert_eq!(decoder.speaker_count(), 2);
        assert_eq!(decoder.channel_count(), 4);
    }

    #[test]
    fn cube_preset_has_eight_speakers() {
        let directions = SpeakerArrayPreset::Cube.directions();
        assert_eq!(directions.len(), 8);
    }

    #[test]
    fn dodecahedron_preset_has_twenty_speakers() {
        let directions = SpeakerArrayPreset::Dodecahedron.directions();
        assert_eq!(directions.len(), 20);
    }

    #[test]
    fn lebedev26_preset_has_twenty_six_points() {
        let directions = SpeakerArrayPreset::Lebedev26.directions();
        assert_eq!(directions.len(), 26);
    }

    #[test]
    fn mono_w_only_soundfield_reaches_every_speaker_equally() {
        let decoder = AmbisonicDecoder::from_preset(1, true, SpeakerArrayPreset::Surround51);
        let channels = vec![
            vec![1.0f32],
            vec![0.0],
            vec![0.0],
            vec![0.0],
        ];
        let mut out = vec![vec![0.0f32]; decoder.speaker_count()];
        decoder.decode_block(&channels, &mut out);
        let first = out[0][0];
        for speaker in &out {
            assert!((speaker[0] - first).abs() < 1e-5);
        }
    }

    #[test]
    fn stereo_decode_front_is_symmetric() {
        let (l, r) = decode_stereo_frame(1.0, 0.0);
        assert!((l - r).abs() < 1e-6);
    }
}
