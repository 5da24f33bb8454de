//! B-format ambisonics: soundfield encoding, Z-Y-Z rotation, and decoding
//! onto speaker arrays ranging from stereo to 26-point Lebedev grids.

pub mod bformat;
pub mod decoder;
pub mod rotation;

pub use bformat::{channel_basis, component_count, encode_accumulate};
pub use decoder::{
    decode_stereo_frame, AmbisonicDecoder, SpeakerArrayPreset, SpeakerDirection,
    STEREO_DECODER_COEFFICIENTS,
};
pub use rotation::BFormatRotator;
