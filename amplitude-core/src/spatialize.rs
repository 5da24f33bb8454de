//! Spatialization and binauralization: the per-real-channel, per-block
//! chain from attenuation through panning. Decode/resample happen
//! upstream in the real channel's pipeline `InputNode`; this module
//! picks up from there and accumulates the result into a bus mix buffer.

use glam::Vec3;

use amplitude_ambisonics::{AmbisonicDecoder, BFormatRotator};
use amplitude_dsp::fft::OverlapSaveConvolver;
use amplitude_dsp::gain::{stereo_pan_gain_spherical, GainProcessor};
use amplitude_dsp::{BiquadFilter, BiquadParams, BiquadType};
use amplitude_hrir::HrirSphere;
use amplitude_spatial::spherical::SphericalPosition;

use crate::ambisonic_mode::{PanningMode, Spatialization};
use crate::config::{ObstructionConfig, OcclusionConfig};
use crate::entities::Orientation;

const HRTF_INTERPOLATION_STEPS: usize = 16;
const HRTF_INTERPOLATION_BLOCK_SIZE: usize = 128;
const DOPPLER_EPSILON: f32 = 1e-4;

/// Piecewise-linear lookup over a curve's `(x, y)` control points, sorted
/// by `x`; clamps to the first/last point outside the curve's domain.
pub fn curve_lookup(points: &[(f32, f32)], x: f32) -> f32 {
    if points.is_empty() {
        return 0.0;
    }
    if x <= points[0].0 {
        return points[0].1;
    }
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            let t = if (x1 - x0).abs() < 1e-9 { 0.0 } else { (x - x0) / (x1 - x0) };
            return y0 + (y1 - y0) * t;
        }
    }
    points.last().unwrap().1
}

/// Attenuation by distance, normalized `distance / max_distance` looked up
/// against the asset-provided curve.
pub fn distance_attenuation(curve: &[(f32, f32)], distance: f32, max_distance: f32) -> f32 {
    if max_distance <= 0.0 {
        return 1.0;
    }
    let t = (distance / max_distance).clamp(0.0, 1.0);
    curve_lookup(curve, t).clamp(0.0, 1.0)
}

/// Doppler pitch factor from relative radial velocity along the
/// source→listener axis: `f = clamp((c − v_listener)/(c − v_source), ε,
/// 1/ε)` with `c = sound_speed · doppler_factor`.
pub fn doppler_pitch_factor(
    source_position: Vec3,
    source_velocity: Vec3,
    listener_position: Vec3,
    listener_velocity: Vec3,
    sound_speed: f32,
    doppler_factor: f32,
) -> f32 {
    let offset = source_position - listener_position;
    let distance = offset.length();
    if distance < 1e-6 {
        return 1.0;
    }
    let direction = offset / distance;
    let v_listener = listener_velocity.dot(direction);
    let v_source = source_velocity.dot(direction);
    let c = sound_speed * doppler_factor;
    let denominator = c - v_source;
    if denominator.abs() < DOPPLER_EPSILON {
        return (1.0 / DOPPLER_EPSILON).min(1.0 / DOPPLER_EPSILON);
    }
    ((c - v_listener) / denominator).clamp(DOPPLER_EPSILON, 1.0 / DOPPLER_EPSILON)
}

/// Projects a world-space offset into a listener's local frame: `x` is the
/// listener's right, `y` its forward, `z` its up — matching
/// [`SphericalPosition::for_hrtf`]'s expected axes.
pub fn to_listener_space(offset: Vec3, listener_orientation: Orientation) -> Vec3 {
    let forward = listener_orientation.forward.normalize_or_zero();
    let up = listener_orientation.up.normalize_or_zero();
    let right = forward.cross(up).normalize_or_zero();
    let up = right.cross(forward).normalize_or_zero();
    Vec3::new(offset.dot(right), offset.dot(forward), offset.dot(up))
}

/// Per-channel persistent state for the obstruction/occlusion LP+gain
/// chain applied in series ahead of the panner.
struct ObstructionOcclusionChain {
    obstruction_lp: BiquadFilter,
    occlusion_lp: BiquadFilter,
    obstruction_gain: GainProcessor,
    occlusion_gain: GainProcessor,
}

impl ObstructionOcclusionChain {
    fn new(sample_rate: u32) -> Self {
        let lp = |freq: f32| {
            BiquadFilter::new(
                BiquadParams {
                    wet: 1.0,
                    kind: BiquadType::LowPass,
                    frequency: freq,
                    q_or_shelf_slope: 0.707,
                    gain_db: 0.0,
                },
                sample_rate as f32,
                1,
            )
        };
        Self {
            obstruction_lp: lp(22_000.0),
            occlusion_lp: lp(22_000.0),
            obstruction_gain: GainProcessor::new(),
            occlusion_gain: GainProcessor::new(),
        }
    }

    /// Applies obstruction then occlusion, each an LP-cutoff-and-gain pair
    /// driven by its own `[0, 1]` normalized curve, in series.
    fn process(
        &mut self,
        buffer: &mut [f32],
        obstruction: f32,
        occlusion: f32,
        obstruction_cfg: &ObstructionConfig,
        occlusion_cfg: &OcclusionConfig,
    ) {
        let obstruction_cutoff = curve_lookup(&obstruction_cfg.low_pass_curve, obstruction);
        let obstruction_target_gain = curve_lookup(&obstruction_cfg.gain_curve, obstruction);
        self.obstruction_lp.set_params(BiquadParams {
            wet: 1.0,
            kind: BiquadType::LowPass,
            frequency: obstruction_cutoff.max(10.0),
            q_or_shelf_slope: 0.707,
            gain_db: 0.0,
        });
        self.obstruction_lp.process_channel(0, buffer);
        let mut scratch = buffer.to_vec();
        self.obstruction_gain.apply_gain(obstruction_target_gain, buffer, &mut scratch, false);
        buffer.copy_from_slice(&scratch);

        let occlusion_cutoff = curve_lookup(&occlusion_cfg.low_pass_curve, occlusion);
        let occlusion_target_gain = curve_lookup(&occlusion_cfg.gain_curve, occlusion);
        self.occlusion_lp.set_params(BiquadParams {
            wet: 1.0,
            kind: BiquadType::LowPass,
            frequency: occlusion_cutoff.max(10.0),
            q_or_shelf_slope: 0.707,
            gain_db: 0.0,
        });
        self.occlusion_lp.process_channel(0, buffer);
        self.occlusion_gain.apply_gain(occlusion_target_gain, buffer, &mut scratch, false);
        buffer.copy_from_slice(&scratch);
    }
}

/// B-format encode → rotate → decode → per-speaker HRIR convolution path
/// used by the three binaural quality tiers.
struct AmbisonicPath {
    order: u32,
    decoder: AmbisonicDecoder,
    rotator: BFormatRotator,
    left_convolvers: Vec<OverlapSaveConvolver>,
    right_convolvers: Vec<OverlapSaveConvolver>,
    last_directions: Vec<Vec3>,
}

impl AmbisonicPath {
    fn new(mode: PanningMode, block_size: usize, hrir: &HrirSphere) -> Self {
        let order = mode.ambisonic_order().expect("binaural mode always has an ambisonic order");
        let preset = mode.speaker_preset().expect("binaural mode always has a speaker preset");
        let decoder = AmbisonicDecoder::from_preset(order, true, preset);
        let speaker_count = decoder.speaker_count();
        let mut left_convolvers = Vec::with_capacity(speaker_count);
        let mut right_convolvers = Vec::with_capacity(speaker_count);
        let mut last_directions = Vec::with_capacity(speaker_count);
        let mut left_ir = vec![0.0; hrir.ir_length()];
        let mut right_ir = vec![0.0; hrir.ir_length()];
        for speaker in decoder.speakers() {
            let direction = Vec3::new(
                speaker.azimuth.cos() * speaker.elevation.cos(),
                speaker.azimuth.sin() * speaker.elevation.cos(),
                speaker.elevation.sin(),
            );
            hrir.sample(direction, &mut left_ir, &mut right_ir);
            left_convolvers.push(OverlapSaveConvolver::new(block_size, &left_ir));
            right_convolvers.push(OverlapSaveConvolver::new(block_size, &right_ir));
            last_directions.push(direction);
        }
        Self {
            order,
            decoder,
            rotator: BFormatRotator::new(0.0, 0.0, 0.0),
            left_convolvers,
            right_convolvers,
            last_directions,
        }
    }

    fn process(
        &mut self,
        mono: &[f32],
        source_direction: Vec3,
        listener_rotation_euler: (f32, f32, f32),
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let block_size = mono.len();
        let channel_count = amplitude_ambisonics::component_count(self.order, true);
        let mut bformat: Vec<Vec<f32>> = vec![vec![0.0; block_size]; channel_count];
        let spherical = SphericalPosition::for_hrtf(source_direction);
        amplitude_ambisonics::encode_accumulate(mono, spherical.azimuth(), spherical.elevation(), &mut bformat);

        let (alpha, beta, gamma) = listener_rotation_euler;
        self.rotator.set_orientation(alpha, beta, gamma);
        self.rotator.process(self.order, &mut bformat);

        let mut speaker_feeds: Vec<Vec<f32>> = vec![vec![0.0; block_size]; self.decoder.speaker_count()];
        self.decoder.decode_block(&bformat, &mut speaker_feeds);

        let mut speaker_left = vec![0.0; block_size];
        let mut speaker_right = vec![0.0; block_size];
        for (speaker_index, feed) in speaker_feeds.iter().enumerate() {
            self.left_convolvers[speaker_index].process(feed, &mut speaker_left);
            self.right_convolvers[speaker_index].process(feed, &mut speaker_right);
            for i in 0..block_size {
                out_left[i] += speaker_left[i];
                out_right[i] += speaker_right[i];
            }
        }
        let _ = &self.last_directions;
    }
}

/// Direct HRTF convolution for point sources, sub-blocked per
/// `interpolation_block_size` frames across `interpolation_steps`
/// direction samples so azimuth changes smoothly within a block instead
/// of snapping once per render callback.
struct HrtfDirectPath {
    block_size: usize,
    previous_direction: Vec3,
}

impl HrtfDirectPath {
    fn new() -> Self {
        Self {
            block_size: HRTF_INTERPOLATION_BLOCK_SIZE,
            previous_direction: Vec3::Y,
        }
    }

    fn process(&mut self, mono: &[f32], direction: Vec3, hrir: &HrirSphere, out_left: &mut [f32], out_right: &mut [f32]) {
        let mut left_ir = vec![0.0; hrir.ir_length()];
        let mut right_ir = vec![0.0; hrir.ir_length()];
        let total_frames = mono.len();
        let steps = HRTF_INTERPOLATION_STEPS.max(1);
        let mut offset = 0;
        let mut step = 0;
        while offset < total_frames {
            let this_len = self.block_size.min(total_frames - offset);
            let t = if steps <= 1 { 1.0 } else { step.min(steps - 1) as f32 / (steps - 1) as f32 };
            let interpolated = self.previous_direction.lerp(direction, t).normalize_or_zero();
            let sample_direction = if interpolated.length_squared() < 1e-8 { direction } else { interpolated };
            hrir.sample(sample_direction, &mut left_ir, &mut right_ir);

            let mut convolver_l = OverlapSaveConvolver::new(this_len, &left_ir);
            let mut convolver_r = OverlapSaveConvolver::new(this_len, &right_ir);
            let sub_in = &mono[offset..offset + this_len];
            let mut sub_left = vec![0.0; this_len];
            let mut sub_right = vec![0.0; this_len];
            convolver_l.process(sub_in, &mut sub_left);
            convolver_r.process(sub_in, &mut sub_right);
            out_left[offset..offset + this_len].iter_mut().zip(&sub_left).for_each(|(o, s)| *o += s);
            out_right[offset..offset + this_len].iter_mut().zip(&sub_right).for_each(|(o, s)| *o += s);

            offset += this_len;
            step += 1;
        }
        self.previous_direction = direction;
    }
}

enum Panner {
    Stereo,
    Ambisonic(Box<AmbisonicPath>),
    HrtfDirect(Box<HrtfDirectPath>),
}

/// Persistent per-real-channel spatialization state: obstruction/occlusion
/// filter chain, distance-attenuation gain ramp, and whichever panner the
/// configured [`PanningMode`] selects.
pub struct SpatialChannel {
    chain: ObstructionOcclusionChain,
    distance_gain: GainProcessor,
    pan_left: GainProcessor,
    pan_right: GainProcessor,
    panner: Panner,
}

impl SpatialChannel {
    pub fn new(sample_rate: u32, block_size: usize, panning_mode: PanningMode, hrir: Option<&HrirSphere>) -> Self {
        let panner = match (panning_mode, hrir) {
            (PanningMode::Stereo, _) => Panner::Stereo,
            (PanningMode::Hrtf, Some(_)) => Panner::HrtfDirect(Box::new(HrtfDirectPath::new())),
            (mode, Some(sphere)) if mode.ambisonic_order().is_some() => {
                Panner::Ambisonic(Box::new(AmbisonicPath::new(mode, block_size, sphere)))
            }
            _ => Panner::Stereo,
        };
        Self {
            chain: ObstructionOcclusionChain::new(sample_rate),
            distance_gain: GainProcessor::new(),
            pan_left: GainProcessor::new(),
            pan_right: GainProcessor::new(),
            panner,
        }
    }
}

pub struct SpatialBlockInput<'a> {
    pub source_position: Vec3,
    pub source_velocity: Vec3,
    pub listener_position: Vec3,
    pub listener_velocity: Vec3,
    pub listener_orientation: Orientation,
    pub listener_rotation_euler: (f32, f32, f32),
    pub attenuation_curve: &'a [(f32, f32)],
    pub max_distance: f32,
    pub obstruction: f32,
    pub occlusion: f32,
    pub obstruction_config: &'a ObstructionConfig,
    pub occlusion_config: &'a OcclusionConfig,
    pub gain: f32,
    pub spatialization: Spatialization,
    pub sound_speed: f32,
    pub doppler_factor: f32,
    pub hrir: Option<&'a HrirSphere>,
}

/// Runs one audio block's worth of steps 3-8: attenuation, obstruction,
/// occlusion, doppler, downmix/pan, and accumulation into the bus buffers.
/// Returns the doppler pitch factor the caller should feed back into the
/// layer's resampler for the *next* block.
pub fn process_block(
    state: &mut SpatialChannel,
    mono: &mut [f32],
    input: &SpatialBlockInput<'_>,
    bus_left: &mut [f32],
    bus_right: &mut [f32],
) -> f32 {
    let offset = input.source_position - input.listener_position;
    let distance = offset.length();

    if input.spatialization == Spatialization::None {
        let (left, right) = (input.gain, input.gain);
        state.pan_left.apply_gain(left, mono, bus_left, true);
        state.pan_right.apply_gain(right, mono, bus_right, true);
        return 1.0;
    }

    let attenuation = distance_attenuation(input.attenuation_curve, distance, input.max_distance);
    let mut attenuated = mono.to_vec();
    state.distance_gain.apply_gain(input.gain * attenuation, mono, &mut attenuated, false);

    state.chain.process(
        &mut attenuated,
        input.obstruction,
        input.occlusion,
        input.obstruction_config,
        input.occlusion_config,
    );

    let pitch_factor = doppler_pitch_factor(
        input.source_position,
        input.source_velocity,
        input.listener_position,
        input.listener_velocity,
        input.sound_speed,
        input.doppler_factor,
    );

    let listener_space = to_listener_space(offset, input.listener_orientation);
    let spherical = SphericalPosition::for_hrtf(listener_space);

    match &mut state.panner {
        Panner::Stereo => {
            let (left_gain, right_gain) = stereo_pan_gain_spherical(1.0, spherical.hrtf_azimuth(), spherical.elevation());
            state.pan_left.apply_gain(left_gain, &attenuated, bus_left, true);
            state.pan_right.apply_gain(right_gain, &attenuated, bus_right, true);
        }
        Panner::Ambisonic(path) => {
            path.process(&attenuated, listener_space, input.listener_rotation_euler, bus_left, bus_right);
        }
        Panner::HrtfDirect(path) => {
            if let Some(hrir) = input.hrir {
                path.process(&attenuated, listener_space, hrir, bus_left, bus_right);
            }
        }
    }

    pitch_factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_lookup_interpolates_between_points() {
        let curve = [(0.0, 1.0), (1.0, 0.0)];
        assert!((curve_lookup(&curve, 0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn curve_lookup_clamps_outside_domain() {
        let curve = [(0.0, 1.0), (1.0, 0.0)];
        assert_eq!(curve_lookup(&curve, -1.0), 1.0);
        assert_eq!(curve_lookup(&curve, 2.0), 0.0);
    }

    #[test]
    fn distance_attenuation_is_unity_at_zero_distance() {
        let curve = [(0.0, 1.0), (1.0, 0.0)];
        assert_eq!(distance_attenuation(&curve, 0.0, 10.0), 1.0);
    }

    #[test]
    fn stationary_source_and_listener_has_unit_pitch_factor() {
        let factor = doppler_pitch_factor(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, Vec3::ZERO, Vec3::ZERO, 343.0, 1.0);
        assert!((factor - 1.0).abs() < 1e-6);
    }

    #[test]
    fn approaching_source_raises_pitch_factor() {
        let source_velocity = Vec3::new(-50.0, 0.0, 0.0);
        let factor = doppler_pitch_factor(Vec3::new(10.0, 0.0, 0.0), source_velocity, Vec3::ZERO, Vec3::ZERO, 343.0, 1.0);
        assert!(factor > 1.0, "approaching source should raise pitch, got {factor}");
    }

    #[test]
    fn listener_space_places_forward_source_on_positive_y() {
        let orientation = Orientation { forward: Vec3::Y, up: Vec3::Z };
        let local = to_listener_space(Vec3::new(0.0, 5.0, 0.0), orientation);
        assert!(local.y > 4.9);
        assert!(local.x.abs() < 1e-4);
    }

    #[test]
    fn none_spatialization_applies_plain_gain_without_panning() {
        let mut state = SpatialChannel::new(48_000, 64, PanningMode::Stereo, None);
        let mut mono = vec![1.0f32; 64];
        let mut bus_left = vec![0.0f32; 64];
        let mut bus_right = vec![0.0f32; 64];
        let input = SpatialBlockInput {
            source_position: Vec3::new(0.0, 1.0, 0.0),
            source_velocity: Vec3::ZERO,
            listener_position: Vec3::ZERO,
            listener_velocity: Vec3::ZERO,
            listener_orientation: Orientation::default(),
            listener_rotation_euler: (0.0, 0.0, 0.0),
            attenuation_curve: &[(0.0, 1.0), (1.0, 0.0)],
            max_distance: 10.0,
            obstruction: 0.0,
            occlusion: 0.0,
            obstruction_config: &ObstructionConfig { low_pass_curve: vec![(0.0, 22_000.0)], gain_curve: vec![(0.0, 1.0)] },
            occlusion_config: &OcclusionConfig { low_pass_curve: vec![(0.0, 22_000.0)], gain_curve: vec![(0.0, 1.0)] },
            gain: 0.5,
            spatialization: Spatialization::None,
            sound_speed: 343.0,
            doppler_factor: 1.0,
            hrir: None,
        };
        process_block(&mut state, &mut mono, &input, &mut bus_left, &mut bus_right);
        assert!(bus_left.iter().all(|&s| (s - 0.5).abs() < 0.2));
    }

    #[test]
    fn stereo_panner_accumulates_into_both_bus_channels() {
        let mut state = SpatialChannel::new(48_000, 64, PanningMode::Stereo, None);
        let mut mono = vec![1.0f32; 64];
        let mut bus_left = vec![0.0f32; 64];
        let mut bus_right = vec![0.0f32; 64];
        let input = SpatialBlockInput {
            source_position: Vec3::new(1.0, 0.0, 0.0),
            source_velocity: Vec3::ZERO,
            listener_position: Vec3::ZERO,
            listener_velocity: Vec3::ZERO,
            listener_orientation: Orientation::default(),
            listener_rotation_euler: (0.0, 0.0, 0.0),
            attenuation_curve: &[(0.0, 1.0), (1.0, 0.0)],
            max_distance: 10.0,
            obstruction: 0.0,
            occlusion: 0.0,
            obstruction_config: &ObstructionConfig { low_pass_curve: vec![(0.0, 22_000.0)], gain_curve: vec![(0.0, 1.0)] },
            occlusion_config: &OcclusionConfig { low_pass_curve: vec![(0.0, 22_000.0)], gain_curve: vec![(0.0, 1.0)] },
            gain: 1.0,
            spatialization: Spatialization::Position,
            sound_speed: 343.0,
            doppler_factor: 1.0,
            hrir: None,
        };
        process_block(&mut state, &mut mono, &input, &mut bus_left, &mut bus_right);
        let left_energy: f32 = bus_left.iter().map(|s| s * s).sum();
        let right_energy: f32 = bus_right.iter().map(|s| s * s).sum();
        assert!(right_energy > left_energy, "source to the right should favor the right channel");
    }
}
