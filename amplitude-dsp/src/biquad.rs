//! Resonant biquad filter.

use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadType {
    LowPass,
    HighPass,
    BandPass,
    Peak,
    Notch,
    LowShelf,
    HighShelf,
}

#[derive(Debug, Clone, Copy)]
pub struct BiquadParams {
    pub wet: f32,
    pub kind: BiquadType,
    pub frequency: f32,
    pub q_or_shelf_slope: f32,
    pub gain_db: f32,
}

impl BiquadParams {
    pub fn clamped(mut self) -> Self {
        self.wet = self.wet.clamp(0.0, 1.0);
        self.frequency = self.frequency.clamp(10.0, 30_000.0);
        self.q_or_shelf_slope = self.q_or_shelf_slope.clamp(0.025, 40.0);
        self.gain_db = self.gain_db.clamp(-30.0, 30.0);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

/// Per-channel filter state: direct form II transposed style memory
/// (`x1, x2, y1, y2`), zeroed on creation.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// A biquad filter instance bound to a sample rate. Coefficients are
/// recomputed whenever a parameter or the sample rate changes; per-channel
/// state persists across blocks.
pub struct BiquadFilter {
    params: BiquadParams,
    sample_rate: f32,
    coeffs: Coefficients,
    channels: Vec<ChannelState>,
}

impl BiquadFilter {
    pub fn new(params: BiquadParams, sample_rate: f32, channel_count: usize) -> Self {
        let params = params.clamped();
        let coeffs = compute_coefficients(&params, sample_rate);
        Self {
            params,
            sample_rate,
            coeffs,
            channels: vec![ChannelState::default(); channel_count],
        }
    }

    pub fn set_params(&mut self, params: BiquadParams) {
        let params = params.clamped();
        self.params = params;
        self.coeffs = compute_coefficients(&self.params, self.sample_rate);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.coeffs = compute_coefficients(&self.params, self.sample_rate);
    }

    pub fn params(&self) -> BiquadParams {
        self.params
    }

    /// Process one channel of samples in place.
    pub fn process_channel(&mut self, channel: usize, samples: &mut [f32]) {
        let c = &mut self.channels[channel];
        let coeffs = &self.coeffs;
        let wet = self.params.wet;
        for s in samples.iter_mut() {
            let x = *s;
            let y = coeffs.a0 * x + coeffs.a1 * c.x1 + coeffs.a2 * c.x2 - coeffs.b1 * c.y1
                - coeffs.b2 * c.y2;
            c.x2 = c.x1;
            c.x1 = x;
            c.y2 = c.y1;
            c.y1 = y;
            *s = x + (y - x) * wet;
        }
    }

    pub fn reset(&mut self) {
        for c in self.channels.iter_mut() {
            *c = ChannelState::default();
        }
    }
}

fn compute_coefficients(params: &BiquadParams, sample_rate: f32) -> Coefficients {
    let sample_rate = sample_rate.max(1.0);
    let omega = 2.0 * PI * params.frequency / sample_rate;
    let sin_omega = omega.sin();
    let cos_omega = omega.cos();
    let q = params.q_or_shelf_slope.max(1e-4);
    let a_lin = 10f32.powf(params.gain_db / 40.0);

    // Standard Audio-EQ-Cookbook bilinear-transform forms, normalized so
    // the feedforward/feedback split matches Coefficients{a0,a1,a2,b1,b2}
    // with output `y = a0 x[n] + a1 x[n-1] + a2 x[n-2] - b1 y[n-1] - b2 y[n-2]`.
    let (b0, b1, b2, a0n, a1n, a2n) = match params.kind {
        BiquadType::LowPass => {
            let alpha = sin_omega / (2.0 * q);
            let b1v = 1.0 - cos_omega;
            let b0v = b1v / 2.0;
            let b2v = b0v;
            (b0v, b1v, b2v, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
        }
        BiquadType::HighPass => {
            let alpha = sin_omega / (2.0 * q);
            let b0v = (1.0 + cos_omega) / 2.0;
            let b1v = -(1.0 + cos_omega);
            let b2v = b0v;
            (b0v, b1v, b2v, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
        }
        BiquadType::BandPass => {
            let alpha = sin_omega / (2.0 * q);
            let b0v = alpha;
            let b1v = 0.0;
            let b2v = -alpha;
            (b0v, b1v, b2v, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
        }
        BiquadType::Notch => {
            let alpha = sin_omega / (2.0 * q);
            let b0v = 1.0;
            let b1v = -2.0 * cos_omega;
            let b2v = 1.0;
            (b0v, b1v, b2v, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
        }
        BiquadType::Peak => {
            let alpha = sin_omega / (2.0 * q);
            let b0v = 1.0 + alpha * a_lin;
            let b1v = -2.0 * cos_omega;
            let b2v = 1.0 - alpha * a_lin;
            let a0v = 1.0 + alpha / a_lin;
            let a1v = -2.0 * cos_omega;
            let a2v = 1.0 - alpha / a_lin;
            (b0v, b1v, b2v, a0v, a1v, a2v)
        }
        BiquadType::LowShelf => {
            let s = params.q_or_shelf_slope.max(1e-3);
            let alpha =
                sin_omega / 2.0 * ((a_lin + 1.0 / a_lin) * (1.0 / s - 1.0) + 2.0).max(0.0).sqrt();
            let two_sqrt_a_alpha = 2.0 * a_lin.sqrt() * alpha;
            let b0v = a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_omega + two_sqrt_a_alpha);
            let b1v = 2.0 * a_lin * ((a_lin - 1.0) - (a_lin + 1.0) * cos_omega);
            let b2v = a_lin * ((a_lin + 1.0) - (a_lin - 1.0) * cos_omega - two_sqrt_a_alpha);
            let a0v = (a_lin + 1.0) + (a_lin - 1.0) * cos_omega + two_sqrt_a_alpha;
            let a1v = -2.0 * ((a_lin - 1.0) + (a_lin + 1.0) * cos_omega);
            let a2v = (a_lin + 1.0) + (a_lin - 1.0) * cos_omega - two_sqrt_a_alpha;
            (b0v, b1v, b2v, a0v, a1v, a2v)
        }
        BiquadType::HighShelf => {
            let s = params.q_or_shelf_slope.max(1e-3);
            let alpha =
                sin_omega / 2.0 * ((a_lin + 1.0 / a_lin) * (1.0 / s - 1.0) + 2.0).max(0.0).sqrt();
            let two_sqrt_a_alpha = 2.0 * a_lin.sqrt() * alpha;
            let b0v = a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_omega + two_sqrt_a_alpha);
            let b1v = -2.0 * a_lin * ((a_lin - 1.0) + (a_lin + 1.0) * cos_omega);
            let b2v = a_lin * ((a_lin + 1.0) + (a_lin - 1.0) * cos_omega - two_sqrt_a_alpha);
            let a0v = (a_lin + 1.0) - (a_lin - 1.0) * cos_omega + two_sqrt_a_alpha;
            let a1v = 2.0 * ((a_lin - 1.0) - (a_lin + 1.0) * cos_omega);
            let a2v = (a_lin + 1.0) - (a_lin - 1.0) * cos_omega - two_sqrt_a_alpha;
            (b0v, b1v, b2v, a0v, a1v, a2v)
        }
    };

    Coefficients {
        a0: b0 / a0n,
        a1: b1 / a0n,
        a2: b2 / a0n,
        b1: a1n / a0n,
        b2: a2n / a0n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_types() -> [BiquadType; 7] {
        [
            BiquadType::LowPass,
            BiquadType::HighPass,
            BiquadType::BandPass,
            BiquadType::Peak,
            BiquadType::Notch,
            BiquadType::LowShelf,
            BiquadType::HighShelf,
        ]
    }

    #[test]
    fn finite_output_for_finite_input_across_types() {
        for kind in all_types() {
            let params = BiquadParams {
                wet: 1.0,
                kind,
                frequency: 1000.0,
                q_or_shelf_slope: 0.707,
                gain_db: 6.0,
            };
            let mut filter = BiquadFilter::new(params, 48_000.0, 1);
            let mut samples: Vec<f32> = (0..256).map(|i| (i as f32 * 0.1).sin()).collect();
            filter.process_channel(0, &mut samples);
            assert!(samples.iter().all(|s| s.is_finite()), "{:?}", kind);
        }
    }

    #[test]
    fn nyquist_frequency_does_not_produce_nan() {
        let params = BiquadParams {
            wet: 1.0,
            kind: BiquadType::LowPass,
            frequency: 24_000.0,
            q_or_shelf_slope: 0.707,
            gain_db: 0.0,
        };
        let mut filter = BiquadFilter::new(params, 48_000.0, 1);
        let mut samples = vec![1.0f32; 64];
        filter.process_channel(0, &mut samples);
        assert!(samples.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn zero_wet_is_bypass() {
        let params = BiquadParams {
            wet: 0.0,
            kind: BiquadType::HighPass,
            frequency: 500.0,
            q_or_shelf_slope: 1.0,
            gain_db: 0.0,
        };
        let mut filter = BiquadFilter::new(params, 48_000.0, 1);
        let input: Vec<f32> = (0..32).map(|i| i as f32 * 0.01).collect();
        let mut samples = input.clone();
        filter.process_channel(0, &mut samples);
        for (a, b) in samples.iter().zip(input.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn state_resets_to_zero() {
        let params = BiquadParams {
            wet: 1.0,
            kind: BiquadType::LowPass,
            frequency: 1000.0,
            q_or_shelf_slope: 0.707,
            gain_db: 0.0,
        };
        let mut filter = BiquadFilter::new(params, 48_000.0, 1);
        let mut samples = vec![1.0f32; 16];
        filter.process_channel(0, &mut samples);
        filter.reset();
        assert_eq!(filter.channels[0].x1, 0.0);
        assert_eq!(filter.channels[0].y1, 0.0);
    }
}
