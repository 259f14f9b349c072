//! The buffer pool: fixed frame array, page table, free list, replacer
//! (spec.md §4.3).
//!
//! Grounded on the teacher's `buffer_pool/mod.rs` (`BufferPoolManager` owning
//! `disk_manager`, `free_frames`, `page_table`, `frames: Vec<Frame>`,
//! `replacer: Box<dyn Replacer>`, guarded by one mutex) and
//! `original_source/src/storage/disk/disk_manager.h`'s `(file_id, page_id)`
//! keyed page operations (§3 of SPEC_FULL.md). The teacher wraps this in a
//! `lazy_static!` global singleton (`BUFFER_POOL: Arc<FairMutex<...>>`);
//! SPEC_FULL drops the singleton per Design Notes §9 ("global mutable state
//! for test directories and process lifetime: keep out of the core") — pool
//! size, replacer kind, and data directory are constructor parameters here,
//! and the manager itself is the `Arc`-backed handle callers clone.

use super::frame::{Frame, FrameId};
use super::guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use super::replacer::Replacer;
use crate::disk_manager::DiskManager;
use crate::error::Error;
use crate::page::{FileId, PageId, INVALID_FILE};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

struct Inner {
    disk_manager: DiskManager,
    frames: Vec<Frame>,
    free_list: VecDeque<FrameId>,
    page_table: HashMap<(FileId, PageId), FrameId>,
    replacer: Box<dyn Replacer>,
}

impl Inner {
    fn fetch(&mut self, fid: FileId, pid: PageId) -> Result<FrameId> {
        if let Some(&idx) = self.page_table.get(&(fid, pid)) {
            self.frames[idx].pin();
            self.replacer.pin(idx);
            return Ok(idx);
        }

        let idx = match self.free_list.pop_front() {
            Some(idx) => idx,
            None => self
                .replacer
                .victim()
                .ok_or(Error::NoFreeFrame)?,
        };

        let old_fid = self.frames[idx].fid;
        let old_pid = self.frames[idx].pid;
        if old_fid != INVALID_FILE {
            if self.frames[idx].is_dirty {
                self.disk_manager
                    .write_page(old_fid, old_pid, self.frames[idx].data.as_ref())?;
            }
            self.page_table.remove(&(old_fid, old_pid));
        }

        self.frames[idx].reset();
        self.disk_manager
            .read_page(fid, pid, self.frames[idx].data.as_mut())?;
        self.frames[idx].fid = fid;
        self.frames[idx].pid = pid;
        self.frames[idx].pin();
        self.page_table.insert((fid, pid), idx);
        self.replacer.pin(idx);
        Ok(idx)
    }

    fn unpin(&mut self, fid: FileId, pid: PageId, is_dirty: bool) -> bool {
        let Some(&idx) = self.page_table.get(&(fid, pid)) else {
            return false;
        };
        if self.frames[idx].pin_count() == 0 {
            return false;
        }
        if is_dirty {
            self.frames[idx].is_dirty = true;
        }
        if self.frames[idx].unpin() == 0 {
            self.replacer.unpin(idx);
        }
        true
    }

    fn delete(&mut self, fid: FileId, pid: PageId) -> Result<bool> {
        let Some(&idx) = self.page_table.get(&(fid, pid)) else {
            return Ok(false);
        };
        if self.frames[idx].pin_count() > 0 {
            return Ok(false);
        }
        if self.frames[idx].is_dirty {
            self.disk_manager
                .write_page(fid, pid, self.frames[idx].data.as_ref())?;
        }
        self.page_table.remove(&(fid, pid));
        self.frames[idx].reset();
        self.free_list.push_back(idx);
        Ok(true)
    }

    fn flush_page(&mut self, fid: FileId, pid: PageId) -> Result<bool> {
        let Some(&idx) = self.page_table.get(&(fid, pid)) else {
            return Ok(false);
        };
        if self.frames[idx].is_dirty {
            self.disk_manager
                .write_page(fid, pid, self.frames[idx].data.as_ref())?;
            self.frames[idx].is_dirty = false;
        }
        Ok(true)
    }

    fn resident_pages(&self, fid: FileId) -> Vec<PageId> {
        self.page_table
            .keys()
            .filter(|(f, _)| *f == fid)
            .map(|(_, p)| *p)
            .collect()
    }
}

#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<Mutex<Inner>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer: Box<dyn Replacer>, disk_manager: DiskManager) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(i);
        }
        Self {
            inner: Arc::new(Mutex::new(Inner {
                disk_manager,
                frames,
                free_list,
                page_table: HashMap::new(),
                replacer,
            })),
        }
    }

    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.lock().disk_manager.create(path)
    }

    pub fn destroy_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.lock().disk_manager.destroy(path)
    }

    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<FileId> {
        self.inner.lock().disk_manager.open(path)
    }

    /// Byte-range read bypassing the page cache, used for the file header
    /// page (spec.md §4.1 ReadFile/WriteFile, §3: "Page id 0 must not be
    /// read or written through the normal page header accessors").
    pub fn read_file_bytes(&self, fid: FileId, buf: &mut [u8], offset: u64) -> Result<()> {
        self.inner.lock().disk_manager.read_file(fid, buf, offset)
    }

    pub fn write_file_bytes(&self, fid: FileId, buf: &[u8], offset: u64) -> Result<()> {
        self.inner.lock().disk_manager.write_file(fid, buf, offset)
    }

    /// Fails if any page of `fid` is still resident (the caller must flush
    /// and evict first, per spec.md §3 Lifecycles).
    pub fn close_file(&self, fid: FileId) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.resident_pages(fid).is_empty() {
            anyhow::bail!(Error::FileNotOpen(format!(
                "file {fid} still has resident pages"
            )));
        }
        inner.disk_manager.close(fid)
    }

    pub fn fetch_page_read(&self, fid: FileId, pid: PageId) -> Result<ReadPageGuard> {
        let mut inner = self.inner.lock();
        let idx = inner.fetch(fid, pid)?;
        let ptr = inner.frames[idx].data.as_mut_ptr();
        drop(inner);
        Ok(ReadPageGuard::new(BasicPageGuard::new(
            self.clone(),
            ptr,
            fid,
            pid,
        )))
    }

    pub fn fetch_page_write(&self, fid: FileId, pid: PageId) -> Result<WritePageGuard> {
        let mut inner = self.inner.lock();
        let idx = inner.fetch(fid, pid)?;
        let ptr = inner.frames[idx].data.as_mut_ptr();
        drop(inner);
        Ok(WritePageGuard::new(BasicPageGuard::new(
            self.clone(),
            ptr,
            fid,
            pid,
        )))
    }

    pub fn unpin(&self, fid: FileId, pid: PageId, is_dirty: bool) -> bool {
        self.inner.lock().unpin(fid, pid, is_dirty)
    }

    pub fn delete_page(&self, fid: FileId, pid: PageId) -> Result<bool> {
        self.inner.lock().delete(fid, pid)
    }

    pub fn delete_all_pages(&self, fid: FileId) -> Result<()> {
        let pages = self.inner.lock().resident_pages(fid);
        for pid in pages {
            self.inner.lock().delete(fid, pid)?;
        }
        Ok(())
    }

    pub fn flush_page(&self, fid: FileId, pid: PageId) -> Result<bool> {
        self.inner.lock().flush_page(fid, pid)
    }

    pub fn flush_all_pages(&self, fid: FileId) -> Result<()> {
        let pages = self.inner.lock().resident_pages(fid);
        for pid in pages {
            self.inner.lock().flush_page(fid, pid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacer::Lru;
    use crate::disk_manager::test_path;
    use crate::page::PAGE_SIZE;
    use std::fs;

    fn setup(pool_size: usize) -> (BufferPoolManager, FileId, std::path::PathBuf) {
        let dir = test_path();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("t.db");
        let dm = DiskManager::new();
        let bpm = BufferPoolManager::new(pool_size, Box::new(Lru::new()), dm);
        bpm.create_file(&path).unwrap();
        let fid = bpm.open_file(&path).unwrap();
        (bpm, fid, dir)
    }

    #[test]
    fn scenario_one_eviction_preserves_bytes() {
        let (bpm, fid, dir) = setup(8);

        for pid in 0..8 {
            let mut g = bpm.fetch_page_write(fid, pid).unwrap();
            g.data_mut()[0] = pid as u8 + 1;
            drop(g);
        }
        // pages fetched and immediately dropped above are already unpinned;
        // fetching page 8 should evict (T,0), the least-recently-unpinned.
        let g8 = bpm.fetch_page_read(fid, 8).unwrap();
        assert_eq!(g8.data()[0], 0);
        drop(g8);

        let g0 = bpm.fetch_page_read(fid, 0).unwrap();
        assert_eq!(g0.data()[0], 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn scenario_two_dirty_write_back() {
        let (bpm, fid, dir) = setup(4);

        let mut w = bpm.fetch_page_write(fid, 0).unwrap();
        w.data_mut()[..18].copy_from_slice(b"Hello, Page Guard!");
        drop(w);

        let r = bpm.fetch_page_read(fid, 0).unwrap();
        assert_eq!(&r.data()[..18], b"Hello, Page Guard!");
        drop(r);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn no_free_frame_when_all_pinned() {
        let (bpm, fid, dir) = setup(2);
        let _g0 = bpm.fetch_page_read(fid, 0).unwrap();
        let _g1 = bpm.fetch_page_read(fid, 1).unwrap();
        let err = bpm.fetch_page_read(fid, 2).unwrap_err();
        assert!(matches!(
            err.downcast::<Error>().unwrap(),
            Error::NoFreeFrame
        ));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unpin_unknown_page_returns_false() {
        let (bpm, fid, dir) = setup(2);
        assert!(!bpm.unpin(fid, 99, false));
        fs::remove_dir_all(&dir).ok();
        let _ = PAGE_SIZE;
    }
}
