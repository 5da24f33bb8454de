//! Top-level error taxonomy. Narrower per-crate errors compose in via
//! `#[from]` at this boundary rather than each call site matching on them.

#[derive(Debug, thiserror::Error)]
pub enum AmplitudeError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("load failed: {0}")]
    LoadFailed(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("unknown failure: {0}")]
    Unknown(String),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] amplitude_filesystem::FilesystemError),
    #[error("hrir sphere error: {0}")]
    Hrir(#[from] amplitude_hrir::HrirError),
    #[error("resampler error: {0}")]
    Resampler(#[from] amplitude_dsp::ResamplerError),
}

pub type Result<T> = std::result::Result<T, AmplitudeError>;
