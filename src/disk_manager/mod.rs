//! Named-file lifecycle and raw page I/O (spec.md §4.1).
//!
//! Grounded on the teacher's `disk_manager/mod.rs` (path-keyed file handles,
//! `anyhow` error propagation, a `test_path()` helper using a random scratch
//! directory per test) and on `original_source/src/storage/disk/disk_manager.h`,
//! which keeps the explicit bidirectional name↔file-id map this module
//! copies (`OpenFile`/`GetFileId`/`GetFileName`): the distilled spec.md
//! implies the map but the original is where the exact call shape — file ids
//! as the primary key for every subsequent page op — comes from.

use crate::error::Error;
use crate::page::{FileId, PageId, PAGE_SIZE};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(test)]
pub fn test_path() -> PathBuf {
    use uuid::Uuid;
    std::env::temp_dir().join(format!("pagedb-test-{}", Uuid::new_v4()))
}

pub struct DiskManager {
    name_to_fid: HashMap<PathBuf, FileId>,
    open_files: HashMap<FileId, (PathBuf, File)>,
    next_fid: FileId,
}

impl DiskManager {
    pub fn new() -> Self {
        Self {
            name_to_fid: HashMap::new(),
            open_files: HashMap::new(),
            next_fid: 0,
        }
    }

    pub fn create(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            bail!(Error::FileExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("creating parent directory")?;
        }
        File::create(path).context("creating file")?;
        Ok(())
    }

    pub fn destroy(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            bail!(Error::FileNotExists(path.display().to_string()));
        }
        fs::remove_file(path)
            .map_err(|_| Error::FileDeleteError(path.display().to_string()))?;
        Ok(())
    }

    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<FileId> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            bail!(Error::FileNotExists(path.display().to_string()));
        }
        if self.name_to_fid.contains_key(&path) {
            bail!(Error::FileReopen(path.display().to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .context("opening file")?;

        let fid = self.next_fid;
        self.next_fid += 1;
        self.name_to_fid.insert(path.clone(), fid);
        self.open_files.insert(fid, (path, file));
        Ok(fid)
    }

    pub fn close(&mut self, fid: FileId) -> Result<()> {
        let (path, _) = self
            .open_files
            .remove(&fid)
            .ok_or_else(|| Error::FileNotOpen(fid.to_string()))?;
        self.name_to_fid.remove(&path);
        Ok(())
    }

    pub fn get_file_id(&self, path: impl AsRef<Path>) -> Option<FileId> {
        self.name_to_fid.get(path.as_ref()).copied()
    }

    pub fn get_file_name(&self, fid: FileId) -> Option<PathBuf> {
        self.open_files.get(&fid).map(|(p, _)| p.clone())
    }

    fn file_mut(&mut self, fid: FileId) -> Result<&mut File> {
        self.open_files
            .get_mut(&fid)
            .map(|(_, f)| f)
            .ok_or_else(|| Error::FileNotOpen(fid.to_string()).into())
    }

    pub fn read_page(&mut self, fid: FileId, pid: PageId, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE);
        let offset = pid as u64 * PAGE_SIZE as u64;
        let file = self.file_mut(fid)?;

        let len = file.metadata().map_err(|_| Error::FileReadError(fid.to_string()))?.len();
        if offset >= len {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))
            .map_err(|_| Error::FileReadError(fid.to_string()))?;
        match file.read_exact(buf) {
            Ok(()) => Ok(()),
            // a page that straddles EOF reads as zero-padded, not an error
            Err(_) => {
                buf.fill(0);
                file.seek(SeekFrom::Start(offset)).ok();
                let mut partial = vec![0u8; PAGE_SIZE];
                let n = file.read(&mut partial).unwrap_or(0);
                buf[..n].copy_from_slice(&partial[..n]);
                Ok(())
            }
        }
    }

    pub fn write_page(&mut self, fid: FileId, pid: PageId, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE);
        let offset = pid as u64 * PAGE_SIZE as u64;
        let file = self.file_mut(fid)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|_| Error::FileWriteError(fid.to_string()))?;
        file.write_all(buf)
            .map_err(|_| Error::FileWriteError(fid.to_string()))?;
        Ok(())
    }

    pub fn read_file(&mut self, fid: FileId, buf: &mut [u8], offset: u64) -> Result<()> {
        let file = self.file_mut(fid)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|_| Error::FileReadError(fid.to_string()))?;
        file.read_exact(buf)
            .map_err(|_| Error::FileReadError(fid.to_string()))?;
        Ok(())
    }

    pub fn write_file(&mut self, fid: FileId, buf: &[u8], offset: u64) -> Result<()> {
        let file = self.file_mut(fid)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|_| Error::FileWriteError(fid.to_string()))?;
        file.write_all(buf)
            .map_err(|_| Error::FileWriteError(fid.to_string()))?;
        Ok(())
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::new_page_buf;

    #[test]
    fn create_open_close_destroy() -> Result<()> {
        let dir = test_path();
        fs::create_dir_all(&dir)?;
        let path = dir.join("t1.db");

        let mut dm = DiskManager::new();
        dm.create(&path)?;
        assert!(matches!(
            dm.create(&path).unwrap_err().downcast::<Error>()?,
            Error::FileExists(_)
        ));

        let fid = dm.open(&path)?;
        assert!(matches!(
            dm.open(&path).unwrap_err().downcast::<Error>()?,
            Error::FileReopen(_)
        ));

        dm.close(fid)?;
        assert!(matches!(
            dm.close(fid).unwrap_err().downcast::<Error>()?,
            Error::FileNotOpen(_)
        ));

        dm.destroy(&path)?;
        assert!(matches!(
            dm.destroy(&path).unwrap_err().downcast::<Error>()?,
            Error::FileNotExists(_)
        ));

        fs::remove_dir_all(&dir).ok();
        Ok(())
    }

    #[test]
    fn write_then_read_page() -> Result<()> {
        let dir = test_path();
        fs::create_dir_all(&dir)?;
        let path = dir.join("t2.db");

        let mut dm = DiskManager::new();
        dm.create(&path)?;
        let fid = dm.open(&path)?;

        let mut buf = new_page_buf();
        buf[0..5].copy_from_slice(b"hello");
        dm.write_page(fid, 3, buf.as_slice())?;

        let mut read_back = new_page_buf();
        dm.read_page(fid, 3, read_back.as_mut_slice())?;
        assert_eq!(buf, read_back);

        // a page never written reads as zero
        let mut fresh = new_page_buf();
        dm.read_page(fid, 50, fresh.as_mut_slice())?;
        assert_eq!(fresh.as_slice(), &[0u8; PAGE_SIZE][..]);

        fs::remove_dir_all(&dir).ok();
        Ok(())
    }
}
