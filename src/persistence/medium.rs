//! Byte-addressed non-volatile media
//!
//! Both media follow the EEPROM-emulation model: `write` only touches a RAM
//! cache, `commit` makes the cache durable. `read` always serves from the
//! cache so a write is visible to later reads even before it is committed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Value of an erased flash byte
pub const ERASED_BYTE: u8 = 0xFF;

/// Default emulated EEPROM size in bytes
pub const DEFAULT_MEDIUM_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Access of {len} bytes at offset {offset} exceeds medium capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("Medium I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub trait PersistentMedium: Send {
    fn capacity(&self) -> usize;

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;

    /// Blocks until every previous write is durable
    fn commit(&mut self) -> Result<(), StorageError>;
}

impl<M: PersistentMedium + ?Sized> PersistentMedium for Box<M> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(offset, bytes)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        (**self).commit()
    }
}

fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// RAM-backed medium with a separate committed image
#[derive(Clone, Debug)]
pub struct MemoryMedium {
    cache: Vec<u8>,
    image: Vec<u8>,
    writes: usize,
    commits: usize,
}

impl MemoryMedium {
    /// A medium in its factory state, every byte erased
    pub fn erased(size: usize) -> Self {
        Self::from_image(vec![ERASED_BYTE; size])
    }

    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            cache: image.clone(),
            image,
            writes: 0,
            commits: 0,
        }
    }

    /// Contents as of the last commit
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

impl PersistentMedium for MemoryMedium {
    fn capacity(&self) -> usize {
        self.cache.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.capacity())?;
        buf.copy_from_slice(&self.cache[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), self.capacity())?;
        self.cache[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.image.copy_from_slice(&self.cache);
        self.commits += 1;
        Ok(())
    }
}

/// Medium persisted as a fixed-size image file
#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    cache: Vec<u8>,
}

impl FileMedium {
    /// Opens the image at `path`, starting from an erased image if none exists.
    ///
    /// An image of the wrong size is truncated or padded with erased bytes.
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let cache = if path.exists() {
            let mut bytes = fs::read(&path)?;
            if bytes.len() != size {
                warn!(
                    "Medium image {} has {} bytes, expected {}; resizing",
                    path.display(),
                    bytes.len(),
                    size
                );
                bytes.resize(size, ERASED_BYTE);
            }
            debug!("Loaded medium image from {}", path.display());
            bytes
        } else {
            info!(
                "No medium image at {}, starting from erased state",
                path.display()
            );
            vec![ERASED_BYTE; size]
        };

        Ok(Self { path, cache })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentMedium for FileMedium {
    fn capacity(&self) -> usize {
        self.cache.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.capacity())?;
        buf.copy_from_slice(&self.cache[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), self.capacity())?;
        self.cache[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write a sibling file and rename it over the image so a power cut
        // leaves either the old or the new image.
        let staging = staging_path(&self.path);
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(&self.cache)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        debug!("Committed medium image to {}", self.path.display());
        Ok(())
    }
}

/// Sibling of `path` with `.tmp` appended to the full file name
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_memory_reads_ff() {
        let medium = MemoryMedium::erased(16);
        let mut buf = [0u8; 4];
        medium.read(4, &mut buf).unwrap();
        assert_eq!(buf, [ERASED_BYTE; 4]);
    }

    #[test]
    fn writes_reach_image_only_on_commit() {
        let mut medium = MemoryMedium::erased(8);
        medium.write(2, &[1, 2, 3]).unwrap();

        let mut buf = [0u8; 3];
        medium.read(2, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(&medium.image()[2..5], &[ERASED_BYTE; 3]);

        medium.commit().unwrap();
        assert_eq!(&medium.image()[2..5], &[1, 2, 3]);
        assert_eq!(medium.write_count(), 1);
        assert_eq!(medium.commit_count(), 1);
    }

    #[test]
    fn out_of_bounds_access_fails() {
        let mut medium = MemoryMedium::erased(8);
        let mut buf = [0u8; 4];
        assert!(matches!(
            medium.read(6, &mut buf),
            Err(StorageError::OutOfBounds { offset: 6, len: 4, capacity: 8 })
        ));
        assert!(medium.write(usize::MAX, &[0]).is_err());
        assert_eq!(medium.write_count(), 0);
    }

    #[test]
    fn file_medium_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eeprom.bin");

        let mut medium = FileMedium::open(&path, 32).unwrap();
        let mut buf = [0u8; 2];
        medium.read(0, &mut buf).unwrap();
        assert_eq!(buf, [ERASED_BYTE; 2]);

        medium.write(0, &[0xAB, 0xCD]).unwrap();
        medium.commit().unwrap();

        let reopened = FileMedium::open(&path, 32).unwrap();
        reopened.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xAB, 0xCD]);
        assert_eq!(fs::read(&path).unwrap().len(), 32);
    }

    #[test]
    fn file_medium_pads_short_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eeprom.bin");
        fs::write(&path, [0x01, 0x02]).unwrap();

        let medium = FileMedium::open(&path, 4).unwrap();
        let mut buf = [0u8; 4];
        medium.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0x01, 0x02, ERASED_BYTE, ERASED_BYTE]);
    }

    #[test]
    fn staging_file_keeps_the_full_name() {
        assert_eq!(
            staging_path(Path::new("/var/lib/snespad/eeprom.bin")),
            PathBuf::from("/var/lib/snespad/eeprom.bin.tmp")
        );
        assert_eq!(
            staging_path(Path::new("image.tmp")),
            PathBuf::from("image.tmp.tmp")
        );
    }

    #[test]
    fn image_named_like_a_staging_file_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eeprom.tmp");

        let mut medium = FileMedium::open(&path, 8).unwrap();
        medium.write(0, &[0x11, 0x22]).unwrap();
        medium.commit().unwrap();
        medium.write(2, &[0x33]).unwrap();
        medium.commit().unwrap();

        let reopened = FileMedium::open(&path, 8).unwrap();
        let mut buf = [0u8; 3];
        reopened.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22, 0x33]);
        assert!(!dir.path().join("eeprom.tmp.tmp").exists());
    }
}
