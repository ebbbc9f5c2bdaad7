//-
// Copyright (c) 2020, 2024, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

//! Opaque message content storage.
//!
//! The engine never interprets message bytes. At append time the content is
//! written once into a `ContentStore`, which hands back a `ContentHandle`;
//! afterwards the content is only read back through the handle, which knows
//! its size up front so callers can size buffers before streaming.
//!
//! Content is removed when the last handle is dropped, i.e. when the message
//! has been expunged and no `MessageResult` still refers to it.

use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use tempfile::{NamedTempFile, TempPath};

use crate::support::error::Error;
use crate::support::system_config::{Backend, StorageConfig};

/// Read access to the content of one message.
pub trait ContentHandle: Send + Sync {
    /// The exact length of the content in bytes.
    fn size(&self) -> u64;

    /// Open the content for reading from the start.
    fn open(&self) -> Result<Box<dyn BufRead + '_>, Error>;

    /// Copy the whole content into `dst`.
    fn write_to(&self, dst: &mut dyn Write) -> Result<u64, Error> {
        let mut src = self.open()?;
        Ok(io::copy(&mut src, dst)?)
    }
}

impl fmt::Debug for dyn ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<content {} bytes>", self.size())
    }
}

/// A place to put message content.
pub trait ContentStore: Send + Sync {
    /// Consume `data` to its end and return a handle to the stored copy.
    fn store(
        &self,
        data: &mut dyn Read,
    ) -> Result<Arc<dyn ContentHandle>, Error>;
}

/// Instantiate the content store selected by `config`.
pub fn open_content_store(
    config: &StorageConfig,
) -> Result<Arc<dyn ContentStore>, Error> {
    match config.backend {
        Backend::Memory => Ok(Arc::new(MemoryContentStore)),
        Backend::File => {
            let path = config.path.clone().ok_or_else(|| {
                Error::BadConfig(
                    "storage.path is required for the file backend"
                        .to_owned(),
                )
            })?;
            Ok(Arc::new(FileContentStore::new(path)?))
        }
    }
}

/// Keeps every message as a byte buffer in memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryContentStore;

struct MemoryContent(Vec<u8>);

impl ContentHandle for MemoryContent {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    fn open(&self) -> Result<Box<dyn BufRead + '_>, Error> {
        Ok(Box::new(&self.0[..]))
    }
}

impl ContentStore for MemoryContentStore {
    fn store(
        &self,
        data: &mut dyn Read,
    ) -> Result<Arc<dyn ContentHandle>, Error> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)?;
        Ok(Arc::new(MemoryContent(buf)))
    }
}

/// Keeps each message in its own file inside a spool directory.
///
/// The files are anonymous temporary files which are deleted once their
/// handle is dropped. Nothing survives a restart.
#[derive(Debug)]
pub struct FileContentStore {
    root: PathBuf,
}

impl FileContentStore {
    /// Use `root` as the spool directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, Error> {
        fs::create_dir_all(&root)?;
        info!("Spooling message content in {}", root.display());
        Ok(FileContentStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

struct FileContent {
    path: TempPath,
    size: u64,
}

impl ContentHandle for FileContent {
    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> Result<Box<dyn BufRead + '_>, Error> {
        let file = fs::File::open(&*self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

impl ContentStore for FileContentStore {
    fn store(
        &self,
        data: &mut dyn Read,
    ) -> Result<Arc<dyn ContentHandle>, Error> {
        let mut buffer_file = NamedTempFile::new_in(&self.root)?;
        let size = io::copy(data, &mut buffer_file)?;
        buffer_file.as_file_mut().flush()?;

        Ok(Arc::new(FileContent {
            path: buffer_file.into_temp_path(),
            size,
        }))
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    fn read_back(handle: &dyn ContentHandle) -> Vec<u8> {
        let mut out = Vec::new();
        let written = handle.write_to(&mut out).unwrap();
        assert_eq!(handle.size(), written);
        out
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryContentStore;
        let handle = store.store(&mut &b"Subject: hi\r\n\r\nbody"[..]).unwrap();
        assert_eq!(19, handle.size());
        assert_eq!(b"Subject: hi\r\n\r\nbody".to_vec(), read_back(&*handle));
    }

    #[test]
    fn file_store_removes_content_on_drop() {
        let root = TempDir::new().unwrap();
        let store = FileContentStore::new(root.path().join("spool")).unwrap();

        let handle = store.store(&mut &b"foobar"[..]).unwrap();
        assert_eq!(6, handle.size());
        assert_eq!(b"foobar".to_vec(), read_back(&*handle));
        assert_eq!(1, fs::read_dir(store.root()).unwrap().count());

        drop(handle);
        assert_eq!(0, fs::read_dir(store.root()).unwrap().count());
    }

    #[test]
    fn open_selects_backend() {
        let root = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: Backend::File,
            path: Some(root.path().join("spool")),
        };
        let store = open_content_store(&config).unwrap();
        store.store(&mut &b"x"[..]).unwrap();
        assert!(root.path().join("spool").is_dir());

        let config = StorageConfig {
            backend: Backend::File,
            path: None,
        };
        assert_matches!(
            Some(Error::BadConfig(_)),
            open_content_store(&config).err()
        );

        let config = StorageConfig::default();
        let handle = open_content_store(&config)
            .unwrap()
            .store(&mut &b"xyz"[..])
            .unwrap();
        assert_eq!(3, handle.size());
    }
}
