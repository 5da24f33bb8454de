//! A seekable file handle, abstracted so asset loading code never depends
//! directly on `std::fs`.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::FilesystemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpenMode {
    Read,
    Write,
    Append,
    ReadWrite,
}

pub trait File: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FilesystemError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, FilesystemError>;
    fn seek(&mut self, position: u64) -> Result<u64, FilesystemError>;
    fn position(&mut self) -> Result<u64, FilesystemError>;
    fn length(&mut self) -> Result<u64, FilesystemError>;
    fn eof(&mut self) -> Result<bool, FilesystemError>;
    fn is_valid(&self) -> bool;
    fn path(&self) -> &Path;
}

/// A `File` backed by an unopened path: used as the `open_file` return value
/// when the requested path doesn't exist, so callers can still call
/// `is_valid()` without matching on an `Option`.
pub struct InvalidFile {
    path: PathBuf,
}

impl InvalidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl File for InvalidFile {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, FilesystemError> {
        Err(FilesystemError::InvalidFile(self.path.clone()))
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FilesystemError> {
        Err(FilesystemError::InvalidFile(self.path.clone()))
    }

    fn seek(&mut self, _position: u64) -> Result<u64, FilesystemError> {
        Err(FilesystemError::InvalidFile(self.path.clone()))
    }

    fn position(&mut self) -> Result<u64, FilesystemError> {
        Err(FilesystemError::InvalidFile(self.path.clone()))
    }

    fn length(&mut self) -> Result<u64, FilesystemError> {
        Err(FilesystemError::InvalidFile(self.path.clone()))
    }

    fn eof(&mut self) -> Result<bool, FilesystemError> {
        Ok(true)
    }

    fn is_valid(&self) -> bool {
        false
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

pub struct DiskFile {
    path: PathBuf,
    handle: std::fs::File,
    length: Option<u64>,
}

impl DiskFile {
    pub fn open(path: impl Into<PathBuf>, mode: FileOpenMode) -> Result<Self, FilesystemError> {
        let path = path.into();
        let mut options = OpenOptions::new();
        match mode {
            FileOpenMode::Read => {
                options.read(true);
            }
            FileOpenMode::Write => {
                options.write(true).create(true).truncate(true);
            }
            FileOpenMode::Append => {
                options.append(true).create(true);
            }
            FileOpenMode::ReadWrite => {
                options.read(true).write(true).create(true);
            }
        }
        let handle = options
            .open(&path)
            .map_err(|e| FilesystemError::Io(path.clone(), e.to_string()))?;
        Ok(Self {
            path,
            handle,
            length: None,
        })
    }
}

impl File for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FilesystemError> {
        self.handle
            .read(buf)
            .map_err(|e| FilesystemError::Io(self.path.clone(), e.to_string()))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FilesystemError> {
        self.handle
            .write(buf)
            .map_err(|e| FilesystemError::Io(self.path.clone(), e.to_string()))
    }

    fn seek(&mut self, position: u64) -> Result<u64, FilesystemError> {
        self.handle
            .seek(SeekFrom::Start(position))
            .map_err(|e| FilesystemError::Io(self.path.clone(), e.to_string()))
    }

    fn position(&mut self) -> Result<u64, FilesystemError> {
        self.handle
            .stream_position()
            .map_err(|e| FilesystemError::Io(self.path.clone(), e.to_string()))
    }

    fn length(&mut self) -> Result<u64, FilesystemError> {
        if let Some(len) = self.length {
            return Ok(len);
        }
        let len = self
            .handle
            .metadata()
            .map_err(|e| FilesystemError::Io(self.path.clone(), e.to_string()))?
            .len();
        self.length = Some(len);
        Ok(len)
    }

    fn eof(&mut self) -> Result<bool, FilesystemError> {
        let pos = self.position()?;
        let len = self.length()?;
        Ok(pos >= len)
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
