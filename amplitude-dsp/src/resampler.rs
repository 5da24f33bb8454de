//! Polyphase FIR resampler.

use std::f32::consts::PI;
use thiserror::Error;

/// Largest kernel the resampler will build. Exists so pathological
/// rate ratios (e.g. 1 Hz -> 192 kHz) fail fast instead of allocating an
/// unbounded kernel.
pub const MAX_KERNEL_LENGTH: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum ResamplerError {
    #[error("resampling kernel length {0} exceeds the compile-time maximum {MAX_KERNEL_LENGTH}")]
    KernelTooLarge(usize),
    #[error("sample rates must be nonzero")]
    ZeroSampleRate,
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}

fn generate_windowed_sinc(length: usize, cutoff: f32) -> Vec<f32> {
    let mut taps = vec![0.0f32; length];
    let center = (length as f32 - 1.0) / 2.0;
    for (i, tap) in taps.iter_mut().enumerate() {
        let x = i as f32 - center;
        let sinc = if x.abs() < 1e-8 {
            2.0 * cutoff
        } else {
            (2.0 * PI * cutoff * x).sin() / (PI * x)
        };
        // Hann window.
        let window = 0.5 - 0.5 * (2.0 * PI * i as f32 / (length as f32 - 1.0).max(1.0)).cos();
        *tap = sinc * window;
    }
    taps
}

/// Polyphase FIR resampler. `up/down` is held in lowest terms
/// (`sr_out/gcd : sr_in/gcd`). Identity (`up == down`) bypasses filtering
/// entirely and is a straight copy.
pub struct PolyphaseResampler {
    up: u32,
    down: u32,
    coeffs_per_phase: usize,
    /// Flattened `up * coeffs_per_phase` polyphase filter bank: phase `i`
    /// occupies `[i * coeffs_per_phase, (i + 1) * coeffs_per_phase)`.
    polyphase: Vec<f32>,
    channel_count: usize,
    /// Per-channel tail of `coeffs_per_phase - 1` previous input samples.
    tail: Vec<Vec<f32>>,
    /// Per-channel phase accumulator, `0..up`.
    phase: Vec<u32>,
}

impl PolyphaseResampler {
    pub fn new(sr_in: u32, sr_out: u32, channel_count: usize) -> Result<Self, ResamplerError> {
        if sr_in == 0 || sr_out == 0 {
            return Err(ResamplerError::ZeroSampleRate);
        }
        let g = gcd(sr_in, sr_out);
        let up = sr_out / g;
        let down = sr_in / g;

        let max_rate = up.max(down) as usize;
        let mut kernel_length = max_rate * 13;
        if kernel_length % 2 != 0 {
            kernel_length += 1;
        }
        if kernel_length > MAX_KERNEL_LENGTH {
            return Err(ResamplerError::KernelTooLarge(kernel_length));
        }

        let coeffs_per_phase = (kernel_length + up as usize - 1) / (up as usize).max(1);
        let padded_length = coeffs_per_phase * up as usize;

        let polyphase = if up == down {
            // Identity: no filtering is ever applied, but keep a
            // minimally-sized table so the struct stays uniform.
            vec![0.0; padded_length.max(1)]
        } else {
            let cutoff = 0.5 / max_rate as f32;
            let kernel = generate_windowed_sinc(padded_length.max(kernel_length), cutoff);
            let mut sum = 0.0f32;
            for i in (0..kernel.len()).step_by(up as usize) {
                sum += kernel[i];
            }
            let norm = if sum.abs() > 1e-9 { 1.0 / sum } else { 1.0 };
            // Transpose into the polyphase bank: phase i, tap k <- kernel[k*up + i].
            let mut bank = vec![0.0f32; up as usize * coeffs_per_phase];
            for i in 0..up as usize {
                for k in 0..coeffs_per_phase {
                    let src = k * up as usize + i;
                    bank[i * coeffs_per_phase + k] =
                        if src < kernel.len() { kernel[src] * norm } else { 0.0 };
                }
            }
            bank
        };

        Ok(Self {
            up,
            down,
            coeffs_per_phase,
            polyphase,
            channel_count,
            tail: vec![vec![0.0; coeffs_per_phase.saturating_sub(1)]; channel_count],
            phase: vec![0; channel_count],
        })
    }

    pub fn up(&self) -> u32 {
        self.up
    }

    pub fn down(&self) -> u32 {
        self.down
    }

    pub fn is_identity(&self) -> bool {
        self.up == self.down
    }

    /// Expected output frame count for `input_frames`, matching
    /// `⌊N·up/down⌋` (the actual call may produce one fewer/more depending
    /// on phase).
    pub fn expected_output_frames(&self, input_frames: usize) -> usize {
        (input_frames as u64 * self.up as u64 / self.down as u64) as usize
    }

    /// Process one channel. Returns `(frames_consumed, frames_produced)`;
    /// never consumes more than `input.len()` or produces more than
    /// `output.len()`.
    pub fn process_channel(
        &mut self,
        channel: usize,
        input: &[f32],
        output: &mut [f32],
    ) -> (usize, usize) {
        if self.is_identity() {
            let n = input.len().min(output.len());
            output[..n].copy_from_slice(&input[..n]);
            return (n, n);
        }

        let taps = self.coeffs_per_phase;
        let tail_len = taps.saturating_sub(1);
        let tail = &self.tail[channel];

        let get = |tail: &[f32], input: &[f32], i: isize| -> f32 {
            if i < 0 {
                let idx = (tail_len as isize + i) as usize;
                tail[idx]
            } else {
                input[i as usize]
            }
        };

        let mut t = self.phase[channel];
        let mut input_pos: isize = 0;
        let mut out_idx = 0usize;

        while out_idx < output.len() && input_pos < input.len() as isize {
            let phase_coeffs = &self.polyphase[phase_slot(t as usize, taps)];
            let mut acc = 0.0f32;
            for (k, coeff) in phase_coeffs.iter().enumerate() {
                acc += coeff * get(tail, input, input_pos - k as isize);
            }
            output[out_idx] = acc;
            out_idx += 1;

            t += self.down;
            input_pos += (t / self.up) as isize;
            t %= self.up;
        }

        self.phase[channel] = t;
        let consumed = input_pos.clamp(0, input.len() as isize) as usize;

        // Refresh the tail with the last `tail_len` samples available
        // (preferring new input, falling back to the old tail for a short
        // block).
        if tail_len > 0 {
            let mut new_tail = vec![0.0f32; tail_len];
            for i in 0..tail_len {
                let src_pos = consumed as isize - tail_len as isize + i as isize;
                new_tail[i] = get(&self.tail[channel], input, src_pos.min(input.len() as isize - 1).max(-(tail_len as isize)));
            }
            self.tail[channel] = new_tail;
        }

        (consumed, out_idx)
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn reset(&mut self) {
        for t in self.tail.iter_mut() {
            t.fill(0.0);
        }
        for p in self.phase.iter_mut() {
            *p = 0;
        }
    }
}

fn phase_slot(phase: usize, taps: usize) -> std::ops::Range<usize> {
    phase * taps..(phase + 1) * taps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_byte_exact_passthrough() {
        let mut r = PolyphaseResampler::new(48_000, 48_000, 1).unwrap();
        let input: Vec<f32> = (0..256).map(|i| i as f32).collect();
        let mut output = vec![0.0f32; 256];
        let (cin, cout) = r.process_channel(0, &input, &mut output);
        assert_eq!(cin, 256);
        assert_eq!(cout, 256);
        assert_eq!(input, output);
    }

    #[test]
    fn rejects_absurd_kernel() {
        let r = PolyphaseResampler::new(1, 192_000 * 97, 1);
        assert!(r.is_err());
    }

    #[test]
    fn output_frame_count_matches_expected_bound() {
        let mut r = PolyphaseResampler::new(44_100, 48_000, 1).unwrap();
        let input = vec![0.0f32; 4410];
        let mut output = vec![0.0f32; 8192];
        let (_cin, cout) = r.process_channel(0, &input, &mut output);
        let expected = r.expected_output_frames(4410);
        assert!(
            cout == expected || cout == expected + 1,
            "cout={cout} expected={expected}"
        );
    }
}
