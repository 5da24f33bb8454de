//! Disk-backed filesystem, rooted at a base path so asset paths in sound
//! banks stay relative and portable across machines.

use std::path::{Component, Path, PathBuf};

use crate::file::{DiskFile, File, FileOpenMode, InvalidFile};
use crate::FilesystemError;

pub trait Filesystem: Send + Sync {
    fn resolve_path(&self, path: &Path) -> PathBuf;
    fn exists(&self, path: &Path) -> bool;
    fn is_directory(&self, path: &Path) -> bool;
    fn join(&self, parts: &[&Path]) -> PathBuf;
    fn open_file(&self, path: &Path, mode: FileOpenMode) -> Box<dyn File>;

    /// Begins an asynchronous open (mounting packages, warming caches, ...).
    /// Disk filesystems complete synchronously.
    fn start_open(&mut self) {}
    fn try_finalize_open(&mut self) -> bool {
        true
    }
    fn start_close(&mut self) {}
    fn try_finalize_close(&mut self) -> bool {
        true
    }
}

/// Lexically normalizes a path the way `std::fs::canonicalize` would without
/// requiring the path to exist: resolves `.` and `..` components, dropping
/// leading `..` past the root rather than erroring.
pub fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::RootDir) => {}
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct DiskFileSystem {
    base_path: PathBuf,
}

impl DiskFileSystem {
    pub fn new() -> Result<Self, FilesystemError> {
        let cwd = std::env::current_dir()
            .map_err(|e| FilesystemError::Io(PathBuf::new(), e.to_string()))?;
        Ok(Self { base_path: cwd })
    }

    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn set_base_path(&mut self, base_path: impl Into<PathBuf>) {
        self.base_path = base_path.into();
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl Filesystem for DiskFileSystem {
    fn resolve_path(&self, path: &Path) -> PathBuf {
        lexically_normalize(&self.base_path.join(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve_path(path).exists()
    }

    fn is_directory(&self, path: &Path) -> bool {
        self.resolve_path(path).is_dir()
    }

    fn join(&self, parts: &[&Path]) -> PathBuf {
        if parts.is_empty() {
            return PathBuf::new();
        }
        let mut joined = PathBuf::new();
        for part in parts {
            joined.push(part);
        }
        lexically_normalize(&joined)
    }

    fn open_file(&self, path: &Path, mode: FileOpenMode) -> Box<dyn File> {
        let resolved = self.resolve_path(path);
        match DiskFile::open(resolved.clone(), mode) {
            Ok(file) => Box::new(file),
            Err(e) => {
                tracing::debug!(path = %resolved.display(), error = %e, "failed to open file");
                Box::new(InvalidFile::new(resolved))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn scratch_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn resolve_path_normalizes_dot_dot_segments() {
        let fs = DiskFileSystem::with_base_path("/assets/project");
        let resolved = fs.resolve_path(Path::new("sounds/../sounds/./test.wav"));
        assert_eq!(resolved, PathBuf::from("/assets/project/sounds/test.wav"));
    }

    #[test]
    fn join_normalizes_across_parts() {
        let fs = DiskFileSystem::with_base_path("/assets");
        let joined = fs.join(&[Path::new("./sounds"), Path::new("../sounds/"), Path::new("./test.wav")]);
        assert_eq!(joined, PathBuf::from("sounds/test.wav"));
    }

    #[test]
    fn join_of_empty_slice_is_empty() {
        let fs = DiskFileSystem::with_base_path("/assets");
        assert_eq!(fs.join(&[]), PathBuf::new());
    }

    #[test]
    fn exists_and_is_directory_reflect_disk_state() {
        let dir = scratch_dir();
        std::fs::create_dir(dir.path().join("sounds")).unwrap();
        std::fs::write(dir.path().join("sounds/test.wav"), b"RIFF").unwrap();
        let fs = DiskFileSystem::with_base_path(dir.path());

        assert!(fs.exists(Path::new("sounds/test.wav")));
        assert!(!fs.exists(Path::new("sounds/missing.wav")));
        assert!(fs.is_directory(Path::new("sounds")));
        assert!(!fs.is_directory(Path::new("sounds/test.wav")));
    }

    #[test]
    fn open_file_returns_invalid_handle_for_missing_path() {
        let dir = scratch_dir();
        let fs = DiskFileSystem::with_base_path(dir.path());
        let file = fs.open_file(Path::new("missing.bin"), FileOpenMode::Read);
        assert!(!file.is_valid());
    }

    #[test]
    fn open_file_reads_back_written_bytes() {
        let dir = scratch_dir();
        let mut writer = std::fs::File::create(dir.path().join("data.bin")).unwrap();
        writer.write_all(b"hello amplitude").unwrap();
        drop(writer);

        let fs = DiskFileSystem::with_base_path(dir.path());
        let mut file = fs.open_file(Path::new("data.bin"), FileOpenMode::Read);
        assert!(file.is_valid());
        let mut buf = vec![0u8; 5];
        let read = file.read(&mut buf).unwrap();
        assert_eq!(read, 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(file.length().unwrap(), 15);
    }
}
