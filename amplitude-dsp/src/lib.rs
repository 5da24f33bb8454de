//! Real-time DSP primitives: buffers, biquads, gain ramps, the default
//! resampler, FFT/overlap-save convolution, and the IMA ADPCM codec.
//!
//! Every type in this crate is safe to call from the audio render thread:
//! no locking, no allocation on the steady-state path (construction and
//! resizing aside), and no blocking I/O.

pub mod adpcm;
pub mod biquad;
pub mod buffer;
pub mod fft;
pub mod gain;
pub mod resampler;

pub use adpcm::{decode_block as adpcm_decode_block, encode_block as adpcm_encode_block};
pub use biquad::{BiquadFilter, BiquadParams, BiquadType};
pub use buffer::{AudioBuffer, ChannelRef, ChannelRefMut, SIMD_WIDTH};
pub use fft::{fft, ifft, OverlapSaveConvolver, SplitComplex};
pub use gain::{stereo_pan_gain, stereo_pan_gain_spherical, GainProcessor};
pub use resampler::{PolyphaseResampler, ResamplerError};
