//! File storage for prints, macros, system files and web assets.
//!
//! The storage layer owns a root directory with three subtrees: `gcodes`
//! for print files, `sys` for configuration and macro files, `www` for
//! web assets. Files are read one byte at a time, which is all the
//! interpreter ever needs; an open `FileHandle` keeps its read position,
//! so handing the handle to a state-stack frame and back resumes the
//! stream exactly where it was interrupted.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file {0} not found")]
    NotFound(String),
    #[error("cannot delete {0}")]
    DeleteFailed(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The three directory trees files may live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDirectory {
    /// Print files (`M23`, `M28`, `M30`).
    GCodes,
    /// System files: configuration and canned-cycle macros.
    Sys,
    /// Web assets (`M560` uploads).
    Web,
}

impl FileDirectory {
    fn subdir(self) -> &'static str {
        match self {
            FileDirectory::GCodes => "gcodes",
            FileDirectory::Sys => "sys",
            FileDirectory::Web => "www",
        }
    }
}

pub struct MassStorage {
    root: PathBuf,
}

impl MassStorage {
    /// Open the storage root, creating the directory trees if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for dir in [FileDirectory::GCodes, FileDirectory::Sys, FileDirectory::Web] {
            fs::create_dir_all(root.join(dir.subdir()))?;
        }
        Ok(Self { root })
    }

    fn path_of(&self, dir: FileDirectory, name: &str) -> PathBuf {
        // File names come off the wire; keep them inside their tree.
        let name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.root.join(dir.subdir()).join(name)
    }

    /// Open a file for reading, or create/truncate it for writing.
    pub fn open(
        &self,
        dir: FileDirectory,
        name: &str,
        for_write: bool,
    ) -> Result<FileHandle, StorageError> {
        let path = self.path_of(dir, name);
        if for_write {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            Ok(FileHandle {
                name: name.to_string(),
                inner: HandleKind::Write(file),
            })
        } else {
            let file = File::open(&path).map_err(|_| StorageError::NotFound(name.to_string()))?;
            Ok(FileHandle {
                name: name.to_string(),
                inner: HandleKind::Read(BufReader::new(file)),
            })
        }
    }

    pub fn delete(&self, dir: FileDirectory, name: &str) -> Result<(), StorageError> {
        let path = self.path_of(dir, name);
        fs::remove_file(path).map_err(|_| StorageError::DeleteFailed(name.to_string()))
    }

    /// Names of all files in a directory tree, unordered.
    pub fn list(&self, dir: FileDirectory) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.join(dir.subdir()))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }
}

enum HandleKind {
    Read(BufReader<File>),
    Write(File),
}

/// An open file. Dropping the handle closes it.
pub struct FileHandle {
    name: String,
    inner: HandleKind,
}

impl FileHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next byte of a read handle, or `None` at end of file. I/O errors
    /// are logged and reported as end of file.
    pub fn read_byte(&mut self) -> Option<u8> {
        match &mut self.inner {
            HandleKind::Read(reader) => {
                let mut buf = [0u8; 1];
                match reader.read(&mut buf) {
                    Ok(0) => None,
                    Ok(_) => Some(buf[0]),
                    Err(e) => {
                        tracing::error!("read error on {}: {}", self.name, e);
                        None
                    }
                }
            }
            HandleKind::Write(_) => {
                tracing::error!("attempt to read from write-only file {}", self.name);
                None
            }
        }
    }

    pub fn write_byte(&mut self, b: u8) {
        self.write_bytes(&[b]);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        match &mut self.inner {
            HandleKind::Write(file) => {
                if let Err(e) = file.write_all(bytes) {
                    tracing::error!("write error on {}: {}", self.name, e);
                }
            }
            HandleKind::Read(_) => {
                tracing::error!("attempt to write to read-only file {}", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_back() {
        let dir = tempdir().unwrap();
        let storage = MassStorage::new(dir.path()).unwrap();

        let mut f = storage.open(FileDirectory::GCodes, "part.g", true).unwrap();
        f.write_str("G1 X1\n");
        drop(f);

        let mut f = storage.open(FileDirectory::GCodes, "part.g", false).unwrap();
        let mut text = Vec::new();
        while let Some(b) = f.read_byte() {
            text.push(b);
        }
        assert_eq!(text, b"G1 X1\n");
    }

    #[test]
    fn read_position_survives_handle_moves() {
        let dir = tempdir().unwrap();
        let storage = MassStorage::new(dir.path()).unwrap();

        let mut f = storage.open(FileDirectory::Sys, "macro.g", true).unwrap();
        f.write_str("abcdef");
        drop(f);

        let mut f = storage.open(FileDirectory::Sys, "macro.g", false).unwrap();
        assert_eq!(f.read_byte(), Some(b'a'));
        assert_eq!(f.read_byte(), Some(b'b'));

        // Park the handle elsewhere and take it back, as the state stack does.
        let parked = Some(f);
        let mut f = parked.unwrap();
        assert_eq!(f.read_byte(), Some(b'c'));
    }

    #[test]
    fn list_and_delete() {
        let dir = tempdir().unwrap();
        let storage = MassStorage::new(dir.path()).unwrap();
        storage
            .open(FileDirectory::GCodes, "a.g", true)
            .unwrap()
            .write_str("x");
        storage
            .open(FileDirectory::GCodes, "b.g", true)
            .unwrap()
            .write_str("x");

        let mut names = storage.list(FileDirectory::GCodes).unwrap();
        names.sort();
        assert_eq!(names, vec!["a.g", "b.g"]);

        storage.delete(FileDirectory::GCodes, "a.g").unwrap();
        assert_eq!(storage.list(FileDirectory::GCodes).unwrap(), vec!["b.g"]);
        assert!(storage.delete(FileDirectory::GCodes, "a.g").is_err());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = MassStorage::new(dir.path()).unwrap();
        match storage.open(FileDirectory::Sys, "nope.g", false) {
            Err(StorageError::NotFound(name)) => assert_eq!(name, "nope.g"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
