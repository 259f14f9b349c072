//! RAII page guards (spec.md §4.4).
//!
//! Grounded on the Design Notes §9 callout against raw pointers to pinned
//! pages: "enforce the must-unpin rule statically via page-guard values." The
//! teacher's own `pages::latch`/`Frame` pattern (a pinned, address-stable
//! page buffer accessed through a thin wrapper) is the structural precedent;
//! the split into a shared `BasicPageGuard` plus `ReadPageGuard`/`WritePageGuard`
//! specializations follows spec.md's own vocabulary directly.

use super::pool::BufferPoolManager;
use crate::page::{FileId, PageId, PAGE_SIZE};

/// Move-only; destruction unpins. Copy is forbidden by simply not deriving it.
pub(super) struct BasicPageGuard {
    pool: BufferPoolManager,
    ptr: *mut u8,
    fid: FileId,
    pid: PageId,
    dirty: bool,
    valid: bool,
}

// SAFETY: the pointer addresses a page buffer owned by the buffer pool frame
// array; the frame cannot be reused or reset while this guard holds its pin.
unsafe impl Send for BasicPageGuard {}

impl BasicPageGuard {
    pub(super) fn new(pool: BufferPoolManager, ptr: *mut u8, fid: FileId, pid: PageId) -> Self {
        Self {
            pool,
            ptr,
            fid,
            pid,
            dirty: false,
            valid: true,
        }
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, PAGE_SIZE) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, PAGE_SIZE) }
    }

    fn release(&mut self) {
        if self.valid {
            self.valid = false;
            self.pool.unpin(self.fid, self.pid, self.dirty);
        }
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read-only page access. Never sets the dirty flag.
pub struct ReadPageGuard(BasicPageGuard);

impl ReadPageGuard {
    pub(super) fn new(inner: BasicPageGuard) -> Self {
        Self(inner)
    }

    pub fn fid(&self) -> FileId {
        self.0.fid
    }

    pub fn pid(&self) -> PageId {
        self.0.pid
    }

    pub fn data(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Mutable page access. Any call to `data_mut` marks the guard dirty, so
/// destruction unpins with the dirty flag set unless `unset_dirty` is called
/// first.
pub struct WritePageGuard(BasicPageGuard);

impl WritePageGuard {
    pub(super) fn new(inner: BasicPageGuard) -> Self {
        Self(inner)
    }

    pub fn fid(&self) -> FileId {
        self.0.fid
    }

    pub fn pid(&self) -> PageId {
        self.0.pid
    }

    pub fn data(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.0.dirty = true;
        self.0.as_mut_slice()
    }

    /// Reverts the dirty flag for a caller certain no changes were made.
    pub fn unset_dirty(&mut self) {
        self.0.dirty = false;
    }
}
