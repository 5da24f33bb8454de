//! Gain application and stereo pan-law math.

use std::f32::consts::PI;

/// Below this magnitude a constant gain is treated as zero.
pub const GAIN_THRESHOLD: f32 = 1e-3;
/// The ramp-length-per-unit-delta-gain used by [`GainProcessor`].
const UNIT_RAMP_LENGTH: usize = 2048;

#[inline]
pub fn is_zero_gain(gain: f32) -> bool {
    gain.abs() < GAIN_THRESHOLD
}

#[inline]
pub fn is_unity_gain(gain: f32) -> bool {
    (1.0 - gain).abs() < GAIN_THRESHOLD
}

#[inline]
pub fn lerp(a: f32, t: f32, b: f32) -> f32 {
    a + (b - a) * t
}

/// A curve sampled at `t ∈ [0, 1]`. Implementors back `GainCurve`-driven
/// replace/accumulate.
pub trait NormalizedCurve {
    fn evaluate(&self, t: f32) -> f32;
}

pub fn apply_replace_constant_gain(gain: f32, input: &[f32], output: &mut [f32]) {
    debug_assert_eq!(input.len(), output.len());
    if is_zero_gain(gain) {
        output.fill(0.0);
    } else if is_unity_gain(gain) {
        output.copy_from_slice(input);
    } else {
        for (o, i) in output.iter_mut().zip(input) {
            *o = i * gain;
        }
    }
}

pub fn apply_accumulate_constant_gain(gain: f32, input: &[f32], output: &mut [f32]) {
    debug_assert_eq!(input.len(), output.len());
    if is_unity_gain(gain) {
        for (o, i) in output.iter_mut().zip(input) {
            *o += i;
        }
    } else if !is_zero_gain(gain) {
        for (o, i) in output.iter_mut().zip(input) {
            *o += i * gain;
        }
    }
}

pub fn apply_replace_linear_gain(start: f32, end: f32, input: &[f32], output: &mut [f32]) {
    debug_assert_eq!(input.len(), output.len());
    let frames = input.len().max(1) as f32;
    let step = 1.0 / frames;
    for (j, (o, i)) in output.iter_mut().zip(input).enumerate() {
        *o = i * lerp(start, step * j as f32, end);
    }
}

pub fn apply_accumulate_linear_gain(start: f32, end: f32, input: &[f32], output: &mut [f32]) {
    debug_assert_eq!(input.len(), output.len());
    let frames = input.len().max(1) as f32;
    let step = 1.0 / frames;
    for (j, (o, i)) in output.iter_mut().zip(input).enumerate() {
        *o += i * lerp(start, step * j as f32, end);
    }
}

pub fn apply_replace_curve_gain(curve: &dyn NormalizedCurve, input: &[f32], output: &mut [f32]) {
    let frames = input.len().max(1) as f32;
    let step = 1.0 / frames;
    for (j, (o, i)) in output.iter_mut().zip(input).enumerate() {
        *o = i * curve.evaluate(step * j as f32);
    }
}

pub fn apply_accumulate_curve_gain(curve: &dyn NormalizedCurve, input: &[f32], output: &mut [f32]) {
    let frames = input.len().max(1) as f32;
    let step = 1.0 / frames;
    for (j, (o, i)) in output.iter_mut().zip(input).enumerate() {
        *o += i * curve.evaluate(step * j as f32);
    }
}

/// Equal-power pan law: `gain_L² + gain_R² == gain²` for every pan value.
pub fn stereo_pan_gain(gain: f32, pan: f32) -> (f32, f32) {
    if is_zero_gain(gain) {
        return (0.0, 0.0);
    }
    let pan = pan.clamp(-1.0, 1.0);
    let p = PI * (pan + 1.0) / 4.0;
    let (left, right) = (p.cos(), p.sin());
    (left * left * gain, right * right * gain)
}

/// 3D form: given azimuth/elevation in listener space (radians, azimuth
/// measured HRTF-style counterclockwise-from-right), produce the
/// cos(elevation)-weighted cardioid pair.
pub fn stereo_pan_gain_spherical(gain: f32, azimuth: f32, elevation: f32) -> (f32, f32) {
    if is_zero_gain(gain) {
        return (0.0, 0.0);
    }
    let cos_elev = elevation.cos();
    let left = 0.5 * (1.0 + ((-PI / 2.0) - azimuth).cos() * cos_elev) * gain;
    let right = 0.5 * (1.0 + ((PI / 2.0) - azimuth).cos() * cos_elev) * gain;
    (left, right)
}

/// Tracks ramp state across calls so gain changes never produce a
/// discontinuity (a click). Ramps linearly over `|Δg| * UNIT_RAMP_LENGTH`
/// frames (rounded up to a SIMD block), then holds steady-state for the
/// remainder of the block.
pub struct GainProcessor {
    current_gain: f32,
    initialized: bool,
}

impl GainProcessor {
    pub fn new() -> Self {
        Self {
            current_gain: 0.0,
            initialized: false,
        }
    }

    pub fn with_initial_gain(gain: f32) -> Self {
        Self {
            current_gain: gain,
            initialized: true,
        }
    }

    pub fn current_gain(&self) -> f32 {
        self.current_gain
    }

    pub fn set_gain_immediate(&mut self, gain: f32) {
        self.current_gain = gain;
        self.initialized = true;
    }

    /// Apply (possibly ramped) gain from the processor's current gain to
    /// `target_gain` over `input.len()` frames.
    pub fn apply_gain(
        &mut self,
        target_gain: f32,
        input: &[f32],
        output: &mut [f32],
        accumulate: bool,
    ) {
        debug_assert_eq!(input.len(), output.len());
        if !self.initialized {
            self.set_gain_immediate(0.0);
        }

        let frames = input.len();
        let simd_block = crate::buffer::SIMD_WIDTH;
        let mut ramp_length =
            ((target_gain - self.current_gain).abs() * UNIT_RAMP_LENGTH as f32) as usize;
        if ramp_length > 0 {
            ramp_length = ramp_length.max(simd_block);
            ramp_length = crate::buffer::align_up(ramp_length.saturating_sub(simd_block), simd_block);
        }
        let ramp_length = ramp_length.min(frames);

        if ramp_length > 0 {
            let step = (target_gain - self.current_gain) / ramp_length as f32;
            let mut g = self.current_gain;
            if accumulate {
                for j in 0..ramp_length {
                    output[j] += g * input[j];
                    g += step;
                }
            } else {
                for j in 0..ramp_length {
                    output[j] = g * input[j];
                    g += step;
                }
            }
            self.current_gain = g;
        } else {
            self.current_gain = target_gain;
        }

        if ramp_length < frames {
            let rest_in = &input[ramp_length..];
            let rest_out = &mut output[ramp_length..];
            if is_zero_gain(self.current_gain) {
                if !accumulate {
                    rest_out.fill(0.0);
                }
                return;
            }
            if is_unity_gain(self.current_gain) && !accumulate {
                rest_out.copy_from_slice(rest_in);
                return;
            }
            if accumulate {
                apply_accumulate_constant_gain(self.current_gain, rest_in, rest_out);
            } else {
                apply_replace_constant_gain(self.current_gain, rest_in, rest_out);
            }
        }
    }
}

impl Default for GainProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pan_law_is_constant_power() {
        for i in 0..=20 {
            let pan = -1.0 + i as f32 / 10.0;
            let (l, r) = stereo_pan_gain(1.0, pan);
            let power = l * l + r * r;
            assert!((power - 1.0).abs() < 1e-4, "pan={pan} power={power}");
        }
    }

    #[test]
    fn zero_gain_below_threshold_clears() {
        let input = vec![1.0f32; 8];
        let mut output = vec![9.0f32; 8];
        apply_replace_constant_gain(0.0005, &input, &mut output);
        assert_eq!(output, vec![0.0; 8]);
    }

    #[test]
    fn unity_gain_is_identity_copy() {
        let input = vec![3.0f32; 8];
        let mut output = vec![0.0f32; 8];
        apply_replace_constant_gain(1.0 - 0.0001, &input, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn ramp_reaches_target_gain() {
        let mut gp = GainProcessor::with_initial_gain(0.0);
        let input = vec![1.0f32; 8192];
        let mut output = vec![0.0f32; 8192];
        gp.apply_gain(1.0, &input, &mut output, false);
        assert!((gp.current_gain() - 1.0).abs() < 1e-4);
        assert!((output[8191] - 1.0).abs() < 1e-3);
    }
}
