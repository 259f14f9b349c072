//! A buffer pool frame: one page's worth of memory plus pin/dirty state
//! (spec.md §3 "Frame", §4.3).
//!
//! Grounded on the teacher's `buffer_pool/frame.rs` (`Frame { id, page, counter,
//! history }`, `pin`/`unpin`/`get_pin_count`); the `history: i64` field (marked
//! `// TODO: LRU history, will need a vec for other replacers` in the teacher)
//! is dropped here since replacer-side access history now lives in
//! `buffer::replacer` instead of the frame itself — the frame only tracks pin
//! count and dirty state, matching spec.md §3's definition exactly.

use crate::page::{new_page_buf, FileId, PageBuf, PageId, INVALID_FILE, INVALID_PAGE};

/// Index into the buffer pool's fixed frame array.
pub type FrameId = usize;

pub struct Frame {
    pub data: PageBuf,
    pub fid: FileId,
    pub pid: PageId,
    pub is_dirty: bool,
    pin_count: u32,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            data: new_page_buf(),
            fid: INVALID_FILE,
            pid: INVALID_PAGE,
            is_dirty: false,
            pin_count: 0,
        }
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// Returns the pin count after decrementing.
    pub fn unpin(&mut self) -> u32 {
        debug_assert!(self.pin_count > 0);
        self.pin_count = self.pin_count.saturating_sub(1);
        self.pin_count
    }

    /// Resets the frame to an empty, unpinned state for reuse (spec.md §4.3 Delete).
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.fid = INVALID_FILE;
        self.pid = INVALID_PAGE;
        self.is_dirty = false;
        self.pin_count = 0;
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
