//! Real FFT, split-complex buffers, and overlap-save convolution.

use std::f32::consts::PI;

/// A complex buffer stored as two parallel, aligned `f32` arrays.
#[derive(Debug, Clone)]
pub struct SplitComplex {
    pub re: Vec<f32>,
    pub im: Vec<f32>,
}

impl SplitComplex {
    pub fn zeros(len: usize) -> Self {
        Self {
            re: vec![0.0; len],
            im: vec![0.0; len],
        }
    }

    pub fn from_real(real: &[f32], len: usize) -> Self {
        let mut re = vec![0.0; len];
        re[..real.len().min(len)].copy_from_slice(&real[..real.len().min(len)]);
        Self {
            re,
            im: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.re.len()
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_empty()
    }
}

pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

pub fn next_pow2(n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    let mut p = 1usize;
    while p < n {
        p <<= 1;
    }
    p
}

fn bit_reverse_permute(re: &mut [f32], im: &mut [f32]) {
    let n = re.len();
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = (i as u32).reverse_bits() >> (32 - bits);
        let j = j as usize;
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }
}

/// In-place iterative radix-2 Cooley-Tukey FFT. `n = re.len()` must be a
/// power of two. `inverse` selects the sign of the twiddle factor; the
/// inverse transform is NOT normalized by `1/n` here (call [`ifft`] for
/// that).
pub fn fft_inplace(re: &mut [f32], im: &mut [f32], inverse: bool) {
    let n = re.len();
    debug_assert_eq!(n, im.len());
    debug_assert!(is_power_of_two(n), "FFT size must be a power of two");
    if n <= 1 {
        return;
    }

    bit_reverse_permute(re, im);

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut size = 2usize;
    while size <= n {
        let half = size / 2;
        let angle_step = sign * 2.0 * PI / size as f32;
        let mut start = 0usize;
        while start < n {
            for k in 0..half {
                let angle = angle_step * k as f32;
                let (wr, wi) = (angle.cos(), angle.sin());
                let a = start + k;
                let b = start + k + half;
                let tr = re[b] * wr - im[b] * wi;
                let ti = re[b] * wi + im[b] * wr;
                re[b] = re[a] - tr;
                im[b] = im[a] - ti;
                re[a] += tr;
                im[a] += ti;
            }
            start += size;
        }
        size <<= 1;
    }
}

pub fn fft(x: &mut SplitComplex) {
    fft_inplace(&mut x.re, &mut x.im, false);
}

/// Inverse FFT, normalized by `1/n` so `ifft(fft(x)) == x`.
pub fn ifft(x: &mut SplitComplex) {
    fft_inplace(&mut x.re, &mut x.im, true);
    let n = x.len() as f32;
    for v in x.re.iter_mut() {
        *v /= n;
    }
    for v in x.im.iter_mut() {
        *v /= n;
    }
}

/// Pointwise complex multiply-accumulate: `acc += a * b`.
pub fn complex_mul_accumulate(acc: &mut SplitComplex, a: &SplitComplex, b: &SplitComplex) {
    let n = acc.len().min(a.len()).min(b.len());
    for i in 0..n {
        acc.re[i] += a.re[i] * b.re[i] - a.im[i] * b.im[i];
        acc.im[i] += a.re[i] * b.im[i] + a.im[i] * b.re[i];
    }
}

/// Overlap-save convolver for a fixed impulse response (e.g. an HRIR).
/// Retains `ir_len - 1` samples of input tail across calls.
pub struct OverlapSaveConvolver {
    fft_size: usize,
    ir_len: usize,
    ir_spectrum: SplitComplex,
    tail: Vec<f32>,
}

impl OverlapSaveConvolver {
    pub fn new(block_size: usize, ir: &[f32]) -> Self {
        let ir_len = ir.len();
        let fft_size = next_pow2(block_size + ir_len.saturating_sub(1));
        let mut ir_spectrum = SplitComplex::from_real(ir, fft_size);
        fft(&mut ir_spectrum);
        Self {
            fft_size,
            ir_len,
            ir_spectrum,
            tail: vec![0.0; ir_len.saturating_sub(1)],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Convolve one block, returning the last `block.len()` samples of the
    /// linear convolution (i.e. the causal, overlap-save output) and
    /// updating the retained tail.
    pub fn process(&mut self, block: &[f32], output: &mut [f32]) {
        debug_assert_eq!(block.len(), output.len());
        let tail_len = self.tail.len();

        let mut padded = vec![0.0f32; self.fft_size];
        padded[..tail_len].copy_from_slice(&self.tail);
        padded[tail_len..tail_len + block.len()].copy_from_slice(block);

        let mut spectrum = SplitComplex::from_real(&padded, self.fft_size);
        fft(&mut spectrum);

        let mut product = SplitComplex::zeros(self.fft_size);
        complex_mul_accumulate(&mut product, &spectrum, &self.ir_spectrum);
        ifft(&mut product);

        // Valid (non-circular) convolution output starts at `ir_len - 1`.
        let valid_start = self.ir_len.saturating_sub(1);
        for (i, o) in output.iter_mut().enumerate() {
            let idx = valid_start + i;
            *o = if idx < product.len() { product.re[idx] } else { 0.0 };
        }

        // Update tail: last `tail_len` samples of this block (or of the
        // old tail, if the block itself was shorter).
        if tail_len > 0 {
            let combined_len = tail_len + block.len();
            let mut combined = vec![0.0f32; combined_len];
            combined[..tail_len].copy_from_slice(&self.tail);
            combined[tail_len..].copy_from_slice(block);
            let start = combined_len - tail_len;
            self.tail.copy_from_slice(&combined[start..]);
        }
    }

    pub fn reset(&mut self) {
        self.tail.fill(0.0);
    }
}

/// Direct-form convolution, used as a reference in tests against the
/// overlap-save path.
pub fn direct_convolve(signal: &[f32], ir: &[f32]) -> Vec<f32> {
    let out_len = signal.len() + ir.len() - 1;
    let mut out = vec![0.0f32; out_len];
    for (i, &s) in signal.iter().enumerate() {
        for (j, &h) in ir.iter().enumerate() {
            out[i + j] += s * h;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ifft_of_fft_is_identity() {
        let mut x = SplitComplex::from_real(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 8);
        let original = x.re.clone();
        fft(&mut x);
        ifft(&mut x);
        for (a, b) in x.re.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn overlap_save_matches_direct_convolution() {
        let signal: Vec<f32> = (0..64).map(|i| ((i as f32) * 0.37).sin()).collect();
        let ir: Vec<f32> = (0..9).map(|i| 1.0 / (i as f32 + 1.0)).collect();

        let block = 32;
        let mut conv = OverlapSaveConvolver::new(block, &ir);
        let mut produced = Vec::new();
        for chunk in signal.chunks(block) {
            let mut out = vec![0.0; chunk.len()];
            // Pad the chunk to block size for a uniform call, then trim.
            let mut padded = chunk.to_vec();
            padded.resize(block, 0.0);
            let mut full_out = vec![0.0; block];
            conv.process(&padded, &mut full_out);
            out.copy_from_slice(&full_out[..chunk.len()]);
            produced.extend_from_slice(&out);
        }

        let direct = direct_convolve(&signal, &ir);
        for i in 0..signal.len() {
            assert!(
                (produced[i] - direct[i]).abs() < 1e-3,
                "i={i} produced={} direct={}",
                produced[i],
                direct[i]
            );
        }
    }
}
