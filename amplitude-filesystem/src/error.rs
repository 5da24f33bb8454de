use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FilesystemError {
    #[error("I/O error on {0:?}: {1}")]
    Io(PathBuf, String),
    #[error("operation attempted on an invalid file handle: {0:?}")]
    InvalidFile(PathBuf),
}
