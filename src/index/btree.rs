//! B+ tree secondary index (spec.md §4.7).
//!
//! No teacher precedent survives intact — see DESIGN.md. Laid out in the
//! same style as `table::heap_page`: a fixed node header plus explicit
//! offset accessors over a raw page buffer, reusing `buffer::pool`'s guards
//! and the table module's free-page-chain idiom for node allocation.

use crate::buffer::BufferPoolManager;
use crate::error::Error;
use crate::page::{FileId, PageHeader, PageId, Rid, INVALID_PAGE};
use crate::record::value::{Type, Value};
use anyhow::{bail, Result};
use std::path::Path;

use super::{decode_key, encode_key};

/// Fixed-offset accessors for one B+ tree node page. Every node (leaf or
/// internal) starts with the same 24-byte header after the page's own
/// 16-byte `PageHeader`; leaves and internal nodes diverge after that.
mod node {
    use crate::page::{PageId, Rid, HEADER_SIZE, RID_SIZE};

    pub const NODE_HEADER_BYTES: usize = 24;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum NodeType {
        Internal = 0,
        Leaf = 1,
    }

    pub fn node_type(page: &[u8]) -> NodeType {
        if page[HEADER_SIZE + 4] == 1 {
            NodeType::Leaf
        } else {
            NodeType::Internal
        }
    }

    pub fn set_node_type(page: &mut [u8], t: NodeType) {
        page[HEADER_SIZE + 4] = t as u8;
    }

    pub fn size(page: &[u8]) -> usize {
        u32::from_be_bytes(page[HEADER_SIZE + 8..HEADER_SIZE + 12].try_into().unwrap()) as usize
    }

    pub fn set_size(page: &mut [u8], n: usize) {
        page[HEADER_SIZE + 8..HEADER_SIZE + 12].copy_from_slice(&(n as u32).to_be_bytes());
    }

    pub fn max_size(page: &[u8]) -> usize {
        u32::from_be_bytes(page[HEADER_SIZE + 12..HEADER_SIZE + 16].try_into().unwrap()) as usize
    }

    pub fn set_max_size(page: &mut [u8], n: usize) {
        page[HEADER_SIZE + 12..HEADER_SIZE + 16].copy_from_slice(&(n as u32).to_be_bytes());
    }

    pub fn parent(page: &[u8]) -> PageId {
        PageId::from_be_bytes(page[HEADER_SIZE + 16..HEADER_SIZE + 20].try_into().unwrap())
    }

    pub fn set_parent(page: &mut [u8], p: PageId) {
        page[HEADER_SIZE + 16..HEADER_SIZE + 20].copy_from_slice(&p.to_be_bytes());
    }

    pub fn set_own_id(page: &mut [u8], id: PageId) {
        page[HEADER_SIZE + 20..HEADER_SIZE + 24].copy_from_slice(&id.to_be_bytes());
    }

    fn leaf_next_offset() -> usize {
        HEADER_SIZE + NODE_HEADER_BYTES
    }

    pub fn leaf_next(page: &[u8]) -> PageId {
        let o = leaf_next_offset();
        PageId::from_be_bytes(page[o..o + 4].try_into().unwrap())
    }

    pub fn set_leaf_next(page: &mut [u8], id: PageId) {
        let o = leaf_next_offset();
        page[o..o + 4].copy_from_slice(&id.to_be_bytes());
    }

    fn key_size_offset(is_leaf: bool) -> usize {
        if is_leaf {
            leaf_next_offset() + 4
        } else {
            HEADER_SIZE + NODE_HEADER_BYTES
        }
    }

    pub fn set_key_size(page: &mut [u8], is_leaf: bool, key_size: usize) {
        let o = key_size_offset(is_leaf);
        page[o..o + 4].copy_from_slice(&(key_size as u32).to_be_bytes());
    }

    fn leaf_body_start() -> usize {
        key_size_offset(true) + 4
    }

    fn internal_body_start() -> usize {
        key_size_offset(false) + 4
    }

    pub fn leaf_rid_at(page: &[u8], i: usize) -> Rid {
        let base = leaf_body_start() + i * RID_SIZE;
        crate::page::rid_from_bytes(&page[base..base + RID_SIZE])
    }

    pub fn leaf_set_rid_at(page: &mut [u8], i: usize, rid: Rid, _max_size: usize) {
        let base = leaf_body_start() + i * RID_SIZE;
        page[base..base + RID_SIZE].copy_from_slice(&crate::page::rid_to_bytes(rid));
    }

    pub fn leaf_key_at<'a>(page: &'a [u8], i: usize, max_size: usize, key_size: usize) -> &'a [u8] {
        let keys_start = leaf_body_start() + max_size * RID_SIZE;
        let base = keys_start + i * key_size;
        &page[base..base + key_size]
    }

    pub fn leaf_set_key_at(page: &mut [u8], i: usize, max_size: usize, key: &[u8]) {
        let keys_start = leaf_body_start() + max_size * RID_SIZE;
        let base = keys_start + i * key.len();
        page[base..base + key.len()].copy_from_slice(key);
    }

    pub fn internal_child_at(page: &[u8], i: usize) -> PageId {
        let base = internal_body_start() + i * 4;
        PageId::from_be_bytes(page[base..base + 4].try_into().unwrap())
    }

    pub fn internal_set_child_at(page: &mut [u8], i: usize, child: PageId, _max_children: usize) {
        let base = internal_body_start() + i * 4;
        page[base..base + 4].copy_from_slice(&child.to_be_bytes());
    }

    pub fn internal_key_at<'a>(
        page: &'a [u8],
        i: usize,
        max_children: usize,
        key_size: usize,
    ) -> &'a [u8] {
        let keys_start = internal_body_start() + max_children * 4;
        let base = keys_start + i * key_size;
        &page[base..base + key_size]
    }

    pub fn internal_set_key_at(page: &mut [u8], i: usize, max_children: usize, key: &[u8]) {
        let keys_start = internal_body_start() + max_children * 4;
        let base = keys_start + i * key.len();
        page[base..base + key.len()].copy_from_slice(key);
    }

    /// Bytes needed on one page for a leaf with room for `max_size` entries.
    pub fn leaf_page_bytes(max_size: usize, key_size: usize) -> usize {
        HEADER_SIZE + NODE_HEADER_BYTES + 8 + max_size * (RID_SIZE + key_size)
    }

    /// Bytes needed on one page for an internal node with `max_size` keys
    /// (`max_size + 1` children).
    pub fn internal_page_bytes(max_size: usize, key_size: usize) -> usize {
        HEADER_SIZE + NODE_HEADER_BYTES + 4 + (max_size + 1) * (4 + key_size)
    }
}

const HEADER_BYTES: usize = 40;

#[derive(Debug, Clone, Copy)]
struct Header {
    root_page_id: PageId,
    first_free_page: PageId,
    key_size: u32,
    value_size: u32,
    entry_count: u64,
    height: u32,
    page_count: u32,
    leaf_max_size: u32,
    internal_max_size: u32,
}

impl Header {
    fn serialize(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        out[0..4].copy_from_slice(&self.root_page_id.to_be_bytes());
        out[4..8].copy_from_slice(&self.first_free_page.to_be_bytes());
        out[8..12].copy_from_slice(&self.key_size.to_be_bytes());
        out[12..16].copy_from_slice(&self.value_size.to_be_bytes());
        out[16..24].copy_from_slice(&self.entry_count.to_be_bytes());
        out[24..28].copy_from_slice(&self.height.to_be_bytes());
        out[28..32].copy_from_slice(&self.page_count.to_be_bytes());
        out[32..36].copy_from_slice(&self.leaf_max_size.to_be_bytes());
        out[36..40].copy_from_slice(&self.internal_max_size.to_be_bytes());
        out
    }

    fn deserialize(data: &[u8]) -> Self {
        Self {
            root_page_id: PageId::from_be_bytes(data[0..4].try_into().unwrap()),
            first_free_page: PageId::from_be_bytes(data[4..8].try_into().unwrap()),
            key_size: u32::from_be_bytes(data[8..12].try_into().unwrap()),
            value_size: u32::from_be_bytes(data[12..16].try_into().unwrap()),
            entry_count: u64::from_be_bytes(data[16..24].try_into().unwrap()),
            height: u32::from_be_bytes(data[24..28].try_into().unwrap()),
            page_count: u32::from_be_bytes(data[28..32].try_into().unwrap()),
            leaf_max_size: u32::from_be_bytes(data[32..36].try_into().unwrap()),
            internal_max_size: u32::from_be_bytes(data[36..40].try_into().unwrap()),
        }
    }
}

/// Largest `n` such that a leaf (resp. internal) node with `n` entries fits
/// in one page, for a given key size.
fn compute_max_sizes(key_size: usize) -> (u32, u32) {
    let mut leaf = 0usize;
    while node::leaf_page_bytes(leaf + 1, key_size) <= crate::page::PAGE_SIZE {
        leaf += 1;
    }
    let mut internal = 0usize;
    while node::internal_page_bytes(internal + 1, key_size) <= crate::page::PAGE_SIZE {
        internal += 1;
    }
    (leaf as u32, internal as u32)
}

pub struct BTreeIndex {
    bpm: BufferPoolManager,
    fid: FileId,
    key_ty: Type,
    header: Header,
}

impl BTreeIndex {
    pub fn create(bpm: BufferPoolManager, path: impl AsRef<Path>, key_ty: Type) -> Result<Self> {
        let key_size = key_ty.size();
        let (leaf_max, internal_max) = compute_max_sizes(key_size);
        if leaf_max == 0 || internal_max == 0 {
            bail!(Error::IndexFail(
                "key type too large to fit a leaf or internal node on one page".into()
            ));
        }
        let key_schema_bytes = 4 + 8; // tag + size, matches record::schema's field wire format
        if HEADER_BYTES + key_schema_bytes + 4 > crate::page::PAGE_SIZE {
            bail!(Error::IndexFail("index header exceeds one page".into()));
        }

        bpm.create_file(&path)?;
        let fid = bpm.open_file(&path)?;
        let header = Header {
            root_page_id: INVALID_PAGE,
            first_free_page: INVALID_PAGE,
            key_size: key_size as u32,
            value_size: crate::page::RID_SIZE as u32,
            entry_count: 0,
            height: 0,
            page_count: 1,
            leaf_max_size: leaf_max,
            internal_max_size: internal_max,
        };
        let index = Self {
            bpm,
            fid,
            key_ty,
            header,
        };
        index.flush_header()?;
        Ok(index)
    }

    pub fn open(bpm: BufferPoolManager, path: impl AsRef<Path>) -> Result<Self> {
        let fid = bpm.open_file(&path)?;
        let mut header_bytes = [0u8; HEADER_BYTES];
        bpm.read_file_bytes(fid, &mut header_bytes, 0)?;
        let header = Header::deserialize(&header_bytes);

        let mut key_ty_bytes = [0u8; 12];
        bpm.read_file_bytes(fid, &mut key_ty_bytes, HEADER_BYTES as u64)?;
        let tag = u32::from_be_bytes(key_ty_bytes[0..4].try_into().unwrap());
        let size = u64::from_be_bytes(key_ty_bytes[4..12].try_into().unwrap());
        let key_ty = Type::from_tag(tag, size);

        Ok(Self {
            bpm,
            fid,
            key_ty,
            header,
        })
    }

    fn flush_header(&self) -> Result<()> {
        self.bpm.write_file_bytes(self.fid, &self.header.serialize(), 0)?;
        let mut key_ty_bytes = [0u8; 12];
        key_ty_bytes[0..4].copy_from_slice(&self.key_ty.tag().to_be_bytes());
        key_ty_bytes[4..12].copy_from_slice(&(self.key_ty.size() as u64).to_be_bytes());
        self.bpm
            .write_file_bytes(self.fid, &key_ty_bytes, HEADER_BYTES as u64)?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.header.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.header.entry_count == 0
    }

    fn alloc_page(&mut self) -> Result<PageId> {
        if self.header.first_free_page != INVALID_PAGE {
            let pid = self.header.first_free_page;
            let guard = self.bpm.fetch_page_read(self.fid, pid)?;
            let next = PageHeader::read(guard.data()).next_free_page_id;
            drop(guard);
            self.header.first_free_page = next;
            return Ok(pid);
        }
        let pid = self.header.page_count as PageId;
        self.header.page_count += 1;
        Ok(pid)
    }

    fn free_page(&mut self, pid: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
        let mut ph = PageHeader::read(guard.data());
        ph.next_free_page_id = self.header.first_free_page;
        ph.write(guard.data_mut());
        drop(guard);
        self.header.first_free_page = pid;
        Ok(())
    }

    fn find_leaf(&self, key_bytes: &[u8]) -> Result<PageId> {
        let mut pid = self.header.root_page_id;
        let key_size = self.header.key_size as usize;
        loop {
            let guard = self.bpm.fetch_page_read(self.fid, pid)?;
            let data = guard.data();
            if node::node_type(data) == node::NodeType::Leaf {
                return Ok(pid);
            }
            let size = node::size(data);
            let max = self.header.internal_max_size as usize;
            let mut child_idx = 0;
            for i in 1..=size {
                let sep = node::internal_key_at(data, i, max + 1, key_size);
                if sep <= key_bytes {
                    child_idx = i;
                } else {
                    break;
                }
            }
            pid = node::internal_child_at(data, child_idx);
        }
    }

    pub fn search(&self, key: &Value) -> Result<Vec<Rid>> {
        if self.header.root_page_id == INVALID_PAGE {
            return Ok(Vec::new());
        }
        let key_bytes = encode_key(key, &self.key_ty);
        let leaf_pid = self.find_leaf(&key_bytes)?;
        let guard = self.bpm.fetch_page_read(self.fid, leaf_pid)?;
        let data = guard.data();
        let max = node::max_size(data);
        let size = node::size(data);
        let key_size = self.header.key_size as usize;
        let mut out = Vec::new();
        for i in 0..size {
            if node::leaf_key_at(data, i, max, key_size) == key_bytes.as_slice() {
                out.push(node::leaf_rid_at(data, i));
            }
        }
        Ok(out)
    }

    pub fn search_range(&self, low: &Value, high: &Value) -> Result<Vec<(Value, Rid)>> {
        let high_bytes = encode_key(high, &self.key_ty);
        let mut out = Vec::new();
        let iter = self.begin_at(low)?;
        for item in iter {
            let (value, rid) = item?;
            let bytes = encode_key(&value, &self.key_ty);
            if bytes.as_slice() > high_bytes.as_slice() {
                break;
            }
            out.push((value, rid));
        }
        Ok(out)
    }

    pub fn begin(&self) -> Result<BTreeIterator<'_>> {
        if self.header.root_page_id == INVALID_PAGE {
            return Ok(BTreeIterator {
                index: self,
                leaf_pid: INVALID_PAGE,
                slot: 0,
            });
        }
        let mut pid = self.header.root_page_id;
        loop {
            let guard = self.bpm.fetch_page_read(self.fid, pid)?;
            let data = guard.data();
            if node::node_type(data) == node::NodeType::Leaf {
                break;
            }
            pid = node::internal_child_at(data, 0);
        }
        Ok(BTreeIterator {
            index: self,
            leaf_pid: pid,
            slot: 0,
        })
    }

    pub fn begin_at(&self, key: &Value) -> Result<BTreeIterator<'_>> {
        if self.header.root_page_id == INVALID_PAGE {
            return Ok(BTreeIterator {
                index: self,
                leaf_pid: INVALID_PAGE,
                slot: 0,
            });
        }
        let key_bytes = encode_key(key, &self.key_ty);
        let leaf_pid = self.find_leaf(&key_bytes)?;
        let key_size = self.header.key_size as usize;
        let guard = self.bpm.fetch_page_read(self.fid, leaf_pid)?;
        let data = guard.data();
        let max = node::max_size(data);
        let size = node::size(data);
        let mut slot = size;
        for i in 0..size {
            if node::leaf_key_at(data, i, max, key_size) >= key_bytes.as_slice() {
                slot = i;
                break;
            }
        }
        drop(guard);
        Ok(BTreeIterator {
            index: self,
            leaf_pid,
            slot,
        })
    }

    pub fn insert(&mut self, key: &Value, rid: Rid) -> Result<()> {
        let key_bytes = encode_key(key, &self.key_ty);

        if self.header.root_page_id == INVALID_PAGE {
            let root_pid = self.alloc_page()?;
            let key_size = self.header.key_size as usize;
            let leaf_max = self.header.leaf_max_size as usize;
            let mut guard = self.bpm.fetch_page_write(self.fid, root_pid)?;
            let data = guard.data_mut();
            node::set_node_type(data, node::NodeType::Leaf);
            node::set_size(data, 0);
            node::set_max_size(data, leaf_max);
            node::set_parent(data, INVALID_PAGE);
            node::set_own_id(data, root_pid);
            node::set_leaf_next(data, INVALID_PAGE);
            node::set_key_size(data, true, key_size);
            drop(guard);
            self.header.root_page_id = root_pid;
            self.header.height = 1;
        }

        let leaf_pid = self.find_leaf(&key_bytes)?;
        self.insert_into_leaf(leaf_pid, &key_bytes, rid)?;
        self.header.entry_count += 1;
        self.flush_header()
    }

    fn insert_into_leaf(&mut self, leaf_pid: PageId, key_bytes: &[u8], rid: Rid) -> Result<()> {
        let key_size = self.header.key_size as usize;
        let overflow;
        {
            let mut guard = self.bpm.fetch_page_write(self.fid, leaf_pid)?;
            let data = guard.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);

            let mut pos = size;
            for i in 0..size {
                if key_bytes <= node::leaf_key_at(data, i, max, key_size) {
                    pos = i;
                    break;
                }
            }
            for i in (pos..size).rev() {
                let k = node::leaf_key_at(data, i, max, key_size).to_vec();
                let r = node::leaf_rid_at(data, i);
                node::leaf_set_key_at(data, i + 1, max, &k);
                node::leaf_set_rid_at(data, i + 1, r, max);
            }
            node::leaf_set_key_at(data, pos, max, key_bytes);
            node::leaf_set_rid_at(data, pos, rid, max);
            node::set_size(data, size + 1);
            overflow = size + 1 > max;
        }
        if overflow {
            self.split_leaf(leaf_pid)?;
        }
        Ok(())
    }

    fn split_leaf(&mut self, leaf_pid: PageId) -> Result<()> {
        let new_pid = self.alloc_page()?;
        let key_size = self.header.key_size as usize;

        let moved_keys;
        let moved_rids;
        let parent_pid;
        let old_next;
        let max;
        {
            let mut old_guard = self.bpm.fetch_page_write(self.fid, leaf_pid)?;
            let data = old_guard.data_mut();
            max = node::max_size(data);
            let size = node::size(data);
            let mid = size / 2;
            let mut keys = Vec::new();
            let mut rids = Vec::new();
            for i in mid..size {
                keys.push(node::leaf_key_at(data, i, max, key_size).to_vec());
                rids.push(node::leaf_rid_at(data, i));
            }
            node::set_size(data, mid);
            parent_pid = node::parent(data);
            old_next = node::leaf_next(data);
            node::set_leaf_next(data, new_pid);
            moved_keys = keys;
            moved_rids = rids;
        }

        let first_new_key = moved_keys[0].clone();
        {
            let mut new_guard = self.bpm.fetch_page_write(self.fid, new_pid)?;
            let data = new_guard.data_mut();
            node::set_node_type(data, node::NodeType::Leaf);
            node::set_max_size(data, max);
            node::set_parent(data, parent_pid);
            node::set_own_id(data, new_pid);
            node::set_leaf_next(data, old_next);
            node::set_key_size(data, true, key_size);
            for (i, (k, r)) in moved_keys.iter().zip(moved_rids.iter()).enumerate() {
                node::leaf_set_key_at(data, i, max, k);
                node::leaf_set_rid_at(data, i, *r, max);
            }
            node::set_size(data, moved_keys.len());
        }

        self.insert_separator(parent_pid, leaf_pid, new_pid, &first_new_key)
    }

    fn split_internal(&mut self, pid: PageId) -> Result<()> {
        let new_pid = self.alloc_page()?;
        let key_size = self.header.key_size as usize;

        let promoted_key;
        let moved_children;
        let moved_keys;
        let parent_pid;
        let max;
        {
            let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
            let data = guard.data_mut();
            max = node::max_size(data);
            let size = node::size(data);
            let mid = (size + 1) / 2;

            let mut children = Vec::new();
            let mut keys = Vec::new();
            for i in mid..=size {
                children.push(node::internal_child_at(data, i));
            }
            for i in (mid + 1)..=size {
                keys.push(node::internal_key_at(data, i, max + 1, key_size).to_vec());
            }
            promoted_key = node::internal_key_at(data, mid, max + 1, key_size).to_vec();

            node::set_size(data, mid - 1);
            parent_pid = node::parent(data);
            moved_children = children;
            moved_keys = keys;
        }

        {
            let mut new_guard = self.bpm.fetch_page_write(self.fid, new_pid)?;
            let data = new_guard.data_mut();
            node::set_node_type(data, node::NodeType::Internal);
            node::set_max_size(data, max);
            node::set_parent(data, parent_pid);
            node::set_own_id(data, new_pid);
            node::set_key_size(data, false, key_size);
            for (i, child) in moved_children.iter().enumerate() {
                node::internal_set_child_at(data, i, *child, max + 1);
            }
            for (i, key) in moved_keys.iter().enumerate() {
                node::internal_set_key_at(data, i + 1, max + 1, key);
            }
            node::set_size(data, moved_children.len() - 1);
        }

        for child in &moved_children {
            let mut cg = self.bpm.fetch_page_write(self.fid, *child)?;
            node::set_parent(cg.data_mut(), new_pid);
        }

        self.insert_separator(parent_pid, pid, new_pid, &promoted_key)
    }

    fn insert_separator(
        &mut self,
        parent_pid: PageId,
        left: PageId,
        right: PageId,
        sep_key: &[u8],
    ) -> Result<()> {
        let key_size = self.header.key_size as usize;
        let internal_max = self.header.internal_max_size as usize;

        if parent_pid == INVALID_PAGE {
            let new_root = self.alloc_page()?;
            {
                let mut guard = self.bpm.fetch_page_write(self.fid, new_root)?;
                let data = guard.data_mut();
                node::set_node_type(data, node::NodeType::Internal);
                node::set_max_size(data, internal_max);
                node::set_parent(data, INVALID_PAGE);
                node::set_own_id(data, new_root);
                node::set_key_size(data, false, key_size);
                node::internal_set_child_at(data, 0, left, internal_max + 1);
                node::internal_set_child_at(data, 1, right, internal_max + 1);
                node::internal_set_key_at(data, 1, internal_max + 1, sep_key);
                node::set_size(data, 1);
            }
            {
                let mut lg = self.bpm.fetch_page_write(self.fid, left)?;
                node::set_parent(lg.data_mut(), new_root);
            }
            {
                let mut rg = self.bpm.fetch_page_write(self.fid, right)?;
                node::set_parent(rg.data_mut(), new_root);
            }
            self.header.root_page_id = new_root;
            self.header.height += 1;
            return Ok(());
        }

        let overflow;
        {
            let mut guard = self.bpm.fetch_page_write(self.fid, parent_pid)?;
            let data = guard.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            let mut idx = size;
            for i in 0..=size {
                if node::internal_child_at(data, i) == left {
                    idx = i;
                    break;
                }
            }
            for i in (idx + 1..=size).rev() {
                let child = node::internal_child_at(data, i);
                node::internal_set_child_at(data, i + 1, child, max + 1);
            }
            for i in (idx + 2..=size).rev() {
                let key = node::internal_key_at(data, i, max + 1, key_size).to_vec();
                node::internal_set_key_at(data, i + 1, max + 1, &key);
            }
            node::internal_set_child_at(data, idx + 1, right, max + 1);
            node::internal_set_key_at(data, idx + 1, max + 1, sep_key);
            node::set_size(data, size + 1);
            overflow = size + 1 > max;
        }

        if overflow {
            self.split_internal(parent_pid)?;
        }
        Ok(())
    }

    /// Removes the first (key, RID) pair matching `key`, if any
    /// (spec.md §4.7 Delete).
    pub fn delete(&mut self, key: &Value) -> Result<()> {
        if self.header.root_page_id == INVALID_PAGE {
            return Ok(());
        }
        let key_bytes = encode_key(key, &self.key_ty);
        let leaf_pid = self.find_leaf(&key_bytes)?;
        let removed = self.delete_from_leaf(leaf_pid, &key_bytes)?;
        if removed {
            self.header.entry_count = self.header.entry_count.saturating_sub(1);
            self.adjust_root()?;
            self.flush_header()?;
        }
        Ok(())
    }

    fn delete_from_leaf(&mut self, leaf_pid: PageId, key_bytes: &[u8]) -> Result<bool> {
        let key_size = self.header.key_size as usize;
        let found;
        let underflow;
        {
            let mut guard = self.bpm.fetch_page_write(self.fid, leaf_pid)?;
            let data = guard.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            let mut idx = None;
            for i in 0..size {
                if node::leaf_key_at(data, i, max, key_size) == key_bytes {
                    idx = Some(i);
                    break;
                }
            }
            found = idx.is_some();
            let mut new_size = size;
            if let Some(idx) = idx {
                for i in idx..size - 1 {
                    let k = node::leaf_key_at(data, i + 1, max, key_size).to_vec();
                    let r = node::leaf_rid_at(data, i + 1);
                    node::leaf_set_key_at(data, i, max, &k);
                    node::leaf_set_rid_at(data, i, r, max);
                }
                new_size = size - 1;
                node::set_size(data, new_size);
            }
            let is_root = node::parent(data) == INVALID_PAGE;
            let min = (self.header.leaf_max_size as usize).div_ceil(2);
            underflow = found && !is_root && new_size < min;
        }
        if underflow {
            self.rebalance_leaf(leaf_pid)?;
        }
        Ok(found)
    }

    fn rebalance_leaf(&mut self, pid: PageId) -> Result<()> {
        let min = (self.header.leaf_max_size as usize).div_ceil(2);

        let parent_pid = {
            let guard = self.bpm.fetch_page_read(self.fid, pid)?;
            node::parent(guard.data())
        };
        if parent_pid == INVALID_PAGE {
            return Ok(());
        }

        let (idx, left_sib, right_sib) = self.sibling_indices(parent_pid, pid)?;

        if let Some(right_pid) = right_sib {
            let right_size = {
                let g = self.bpm.fetch_page_read(self.fid, right_pid)?;
                node::size(g.data())
            };
            if right_size > min {
                self.redistribute_leaf_from_right(pid, right_pid, parent_pid, idx)?;
                return Ok(());
            }
        }
        if let Some(left_pid) = left_sib {
            let left_size = {
                let g = self.bpm.fetch_page_read(self.fid, left_pid)?;
                node::size(g.data())
            };
            if left_size > min {
                self.redistribute_leaf_from_left(pid, left_pid, parent_pid, idx)?;
                return Ok(());
            }
        }
        if let Some(left_pid) = left_sib {
            self.coalesce_leaves(left_pid, pid, parent_pid, idx - 1)?;
        } else if let Some(right_pid) = right_sib {
            self.coalesce_leaves(pid, right_pid, parent_pid, idx)?;
        }
        Ok(())
    }

    /// Finds `child`'s index among `parent`'s children, and its immediate
    /// left/right siblings (if any).
    fn sibling_indices(
        &self,
        parent_pid: PageId,
        child: PageId,
    ) -> Result<(usize, Option<PageId>, Option<PageId>)> {
        let guard = self.bpm.fetch_page_read(self.fid, parent_pid)?;
        let data = guard.data();
        let size = node::size(data);
        let mut idx = 0;
        for i in 0..=size {
            if node::internal_child_at(data, i) == child {
                idx = i;
                break;
            }
        }
        let left = if idx > 0 {
            Some(node::internal_child_at(data, idx - 1))
        } else {
            None
        };
        let right = if idx < size {
            Some(node::internal_child_at(data, idx + 1))
        } else {
            None
        };
        Ok((idx, left, right))
    }

    fn redistribute_leaf_from_right(
        &mut self,
        pid: PageId,
        right_pid: PageId,
        parent_pid: PageId,
        idx: usize,
    ) -> Result<()> {
        let key_size = self.header.key_size as usize;
        let moved_key;
        let moved_rid;
        let new_first_key;
        {
            let mut rg = self.bpm.fetch_page_write(self.fid, right_pid)?;
            let data = rg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            moved_key = node::leaf_key_at(data, 0, max, key_size).to_vec();
            moved_rid = node::leaf_rid_at(data, 0);
            for i in 0..size - 1 {
                let k = node::leaf_key_at(data, i + 1, max, key_size).to_vec();
                let r = node::leaf_rid_at(data, i + 1);
                node::leaf_set_key_at(data, i, max, &k);
                node::leaf_set_rid_at(data, i, r, max);
            }
            node::set_size(data, size - 1);
            new_first_key = node::leaf_key_at(data, 0, max, key_size).to_vec();
        }
        {
            let mut pg = self.bpm.fetch_page_write(self.fid, pid)?;
            let data = pg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            node::leaf_set_key_at(data, size, max, &moved_key);
            node::leaf_set_rid_at(data, size, moved_rid, max);
            node::set_size(data, size + 1);
        }
        {
            let mut parentg = self.bpm.fetch_page_write(self.fid, parent_pid)?;
            let data = parentg.data_mut();
            let max_internal = node::max_size(data);
            node::internal_set_key_at(data, idx + 1, max_internal + 1, &new_first_key);
        }
        Ok(())
    }

    fn redistribute_leaf_from_left(
        &mut self,
        pid: PageId,
        left_pid: PageId,
        parent_pid: PageId,
        idx: usize,
    ) -> Result<()> {
        let key_size = self.header.key_size as usize;
        let moved_key;
        let moved_rid;
        {
            let mut lg = self.bpm.fetch_page_write(self.fid, left_pid)?;
            let data = lg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            moved_key = node::leaf_key_at(data, size - 1, max, key_size).to_vec();
            moved_rid = node::leaf_rid_at(data, size - 1);
            node::set_size(data, size - 1);
        }
        {
            let mut pg = self.bpm.fetch_page_write(self.fid, pid)?;
            let data = pg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            for i in (0..size).rev() {
                let k = node::leaf_key_at(data, i, max, key_size).to_vec();
                let r = node::leaf_rid_at(data, i);
                node::leaf_set_key_at(data, i + 1, max, &k);
                node::leaf_set_rid_at(data, i + 1, r, max);
            }
            node::leaf_set_key_at(data, 0, max, &moved_key);
            node::leaf_set_rid_at(data, 0, moved_rid, max);
            node::set_size(data, size + 1);
        }
        {
            let mut parentg = self.bpm.fetch_page_write(self.fid, parent_pid)?;
            let data = parentg.data_mut();
            let max_internal = node::max_size(data);
            node::internal_set_key_at(data, idx, max_internal + 1, &moved_key);
        }
        Ok(())
    }

    fn coalesce_leaves(
        &mut self,
        left_pid: PageId,
        right_pid: PageId,
        parent_pid: PageId,
        sep_idx: usize,
    ) -> Result<()> {
        let key_size = self.header.key_size as usize;
        let left_size = {
            let g = self.bpm.fetch_page_read(self.fid, left_pid)?;
            node::size(g.data())
        };
        let mut right_entries = Vec::new();
        let right_next;
        {
            let rg = self.bpm.fetch_page_read(self.fid, right_pid)?;
            let data = rg.data();
            let max = node::max_size(data);
            let rsize = node::size(data);
            for i in 0..rsize {
                right_entries.push((
                    node::leaf_key_at(data, i, max, key_size).to_vec(),
                    node::leaf_rid_at(data, i),
                ));
            }
            right_next = node::leaf_next(data);
        }
        {
            let mut lg = self.bpm.fetch_page_write(self.fid, left_pid)?;
            let data = lg.data_mut();
            let max = node::max_size(data);
            for (i, (k, r)) in right_entries.iter().enumerate() {
                node::leaf_set_key_at(data, left_size + i, max, k);
                node::leaf_set_rid_at(data, left_size + i, *r, max);
            }
            node::set_size(data, left_size + right_entries.len());
            node::set_leaf_next(data, right_next);
        }
        self.free_page(right_pid)?;
        self.remove_separator(parent_pid, sep_idx)
    }

    fn remove_separator(&mut self, parent_pid: PageId, sep_idx: usize) -> Result<()> {
        let key_size = self.header.key_size as usize;
        let underflow;
        {
            let mut guard = self.bpm.fetch_page_write(self.fid, parent_pid)?;
            let data = guard.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            for i in sep_idx + 1..size {
                let child = node::internal_child_at(data, i + 1);
                node::internal_set_child_at(data, i, child, max + 1);
            }
            for i in sep_idx + 1..size {
                let key = node::internal_key_at(data, i + 1, max + 1, key_size).to_vec();
                node::internal_set_key_at(data, i, max + 1, &key);
            }
            node::set_size(data, size - 1);
            let is_root = node::parent(data) == INVALID_PAGE;
            let min = (self.header.internal_max_size as usize).div_ceil(2);
            underflow = !is_root && size - 1 < min;
        }
        if underflow {
            self.rebalance_internal(parent_pid)?;
        }
        Ok(())
    }

    fn rebalance_internal(&mut self, pid: PageId) -> Result<()> {
        let min = (self.header.internal_max_size as usize).div_ceil(2);
        let key_size = self.header.key_size as usize;

        let parent_pid = {
            let guard = self.bpm.fetch_page_read(self.fid, pid)?;
            node::parent(guard.data())
        };
        if parent_pid == INVALID_PAGE {
            return Ok(());
        }

        let (idx, left_sib, right_sib) = self.sibling_indices(parent_pid, pid)?;

        if let Some(right_pid) = right_sib {
            let right_size = {
                let g = self.bpm.fetch_page_read(self.fid, right_pid)?;
                node::size(g.data())
            };
            if right_size > min {
                self.redistribute_internal_from_right(pid, right_pid, parent_pid, idx, key_size)?;
                return Ok(());
            }
        }
        if let Some(left_pid) = left_sib {
            let left_size = {
                let g = self.bpm.fetch_page_read(self.fid, left_pid)?;
                node::size(g.data())
            };
            if left_size > min {
                self.redistribute_internal_from_left(pid, left_pid, parent_pid, idx, key_size)?;
                return Ok(());
            }
        }
        if let Some(left_pid) = left_sib {
            self.coalesce_internal(left_pid, pid, parent_pid, idx - 1, key_size)?;
        } else if let Some(right_pid) = right_sib {
            self.coalesce_internal(pid, right_pid, parent_pid, idx, key_size)?;
        }
        Ok(())
    }

    fn redistribute_internal_from_right(
        &mut self,
        pid: PageId,
        right_pid: PageId,
        parent_pid: PageId,
        idx: usize,
        key_size: usize,
    ) -> Result<()> {
        let borrowed_child;
        let new_sep_for_parent;
        {
            let mut rg = self.bpm.fetch_page_write(self.fid, right_pid)?;
            let data = rg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            borrowed_child = node::internal_child_at(data, 0);
            new_sep_for_parent = node::internal_key_at(data, 1, max + 1, key_size).to_vec();
            for i in 0..size {
                let child = node::internal_child_at(data, i + 1);
                node::internal_set_child_at(data, i, child, max + 1);
            }
            for i in 1..size {
                let key = node::internal_key_at(data, i + 1, max + 1, key_size).to_vec();
                node::internal_set_key_at(data, i, max + 1, &key);
            }
            node::set_size(data, size - 1);
        }
        let promote_up_key = {
            let pg = self.bpm.fetch_page_read(self.fid, parent_pid)?;
            let data = pg.data();
            let max_internal = node::max_size(data);
            node::internal_key_at(data, idx + 1, max_internal + 1, key_size).to_vec()
        };
        {
            let mut lg = self.bpm.fetch_page_write(self.fid, pid)?;
            let data = lg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            node::internal_set_child_at(data, size + 1, borrowed_child, max + 1);
            node::internal_set_key_at(data, size + 1, max + 1, &promote_up_key);
            node::set_size(data, size + 1);
        }
        {
            let mut bg = self.bpm.fetch_page_write(self.fid, borrowed_child)?;
            node::set_parent(bg.data_mut(), pid);
        }
        {
            let mut parentg = self.bpm.fetch_page_write(self.fid, parent_pid)?;
            let data = parentg.data_mut();
            let max_internal = node::max_size(data);
            node::internal_set_key_at(data, idx + 1, max_internal + 1, &new_sep_for_parent);
        }
        Ok(())
    }

    fn redistribute_internal_from_left(
        &mut self,
        pid: PageId,
        left_pid: PageId,
        parent_pid: PageId,
        idx: usize,
        key_size: usize,
    ) -> Result<()> {
        let borrowed_child;
        let promote_up_key;
        {
            let mut lg = self.bpm.fetch_page_write(self.fid, left_pid)?;
            let data = lg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            borrowed_child = node::internal_child_at(data, size);
            promote_up_key = node::internal_key_at(data, size, max + 1, key_size).to_vec();
            node::set_size(data, size - 1);
        }
        let old_parent_sep = {
            let pg = self.bpm.fetch_page_read(self.fid, parent_pid)?;
            let data = pg.data();
            let max_internal = node::max_size(data);
            node::internal_key_at(data, idx, max_internal + 1, key_size).to_vec()
        };
        {
            let mut rg = self.bpm.fetch_page_write(self.fid, pid)?;
            let data = rg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            for i in (0..=size).rev() {
                let child = node::internal_child_at(data, i);
                node::internal_set_child_at(data, i + 1, child, max + 1);
            }
            for i in (1..=size).rev() {
                let key = node::internal_key_at(data, i, max + 1, key_size).to_vec();
                node::internal_set_key_at(data, i + 1, max + 1, &key);
            }
            node::internal_set_child_at(data, 0, borrowed_child, max + 1);
            node::internal_set_key_at(data, 1, max + 1, &old_parent_sep);
            node::set_size(data, size + 1);
        }
        {
            let mut bg = self.bpm.fetch_page_write(self.fid, borrowed_child)?;
            node::set_parent(bg.data_mut(), pid);
        }
        {
            let mut parentg = self.bpm.fetch_page_write(self.fid, parent_pid)?;
            let data = parentg.data_mut();
            let max_internal = node::max_size(data);
            node::internal_set_key_at(data, idx, max_internal + 1, &promote_up_key);
        }
        Ok(())
    }

    fn coalesce_internal(
        &mut self,
        left_pid: PageId,
        right_pid: PageId,
        parent_pid: PageId,
        sep_idx: usize,
        key_size: usize,
    ) -> Result<()> {
        let sep_key = {
            let pg = self.bpm.fetch_page_read(self.fid, parent_pid)?;
            let data = pg.data();
            let max_internal = node::max_size(data);
            node::internal_key_at(data, sep_idx + 1, max_internal + 1, key_size).to_vec()
        };

        let right_children;
        let right_keys;
        {
            let rg = self.bpm.fetch_page_read(self.fid, right_pid)?;
            let data = rg.data();
            let max = node::max_size(data);
            let size = node::size(data);
            let mut children = Vec::new();
            let mut keys = Vec::new();
            for i in 0..=size {
                children.push(node::internal_child_at(data, i));
            }
            for i in 1..=size {
                keys.push(node::internal_key_at(data, i, max + 1, key_size).to_vec());
            }
            right_children = children;
            right_keys = keys;
        }

        {
            let mut lg = self.bpm.fetch_page_write(self.fid, left_pid)?;
            let data = lg.data_mut();
            let max = node::max_size(data);
            let size = node::size(data);
            node::internal_set_child_at(data, size + 1, right_children[0], max + 1);
            node::internal_set_key_at(data, size + 1, max + 1, &sep_key);
            for (i, child) in right_children.iter().enumerate().skip(1) {
                node::internal_set_child_at(data, size + 1 + i, *child, max + 1);
            }
            for (i, key) in right_keys.iter().enumerate() {
                node::internal_set_key_at(data, size + 2 + i, max + 1, key);
            }
            node::set_size(data, size + right_children.len());
        }

        for child in &right_children {
            let mut cg = self.bpm.fetch_page_write(self.fid, *child)?;
            node::set_parent(cg.data_mut(), left_pid);
        }

        self.free_page(right_pid)?;
        self.remove_separator(parent_pid, sep_idx)
    }

    fn adjust_root(&mut self) -> Result<()> {
        let root = self.header.root_page_id;
        if root == INVALID_PAGE {
            return Ok(());
        }
        let (is_leaf, size) = {
            let g = self.bpm.fetch_page_read(self.fid, root)?;
            (
                node::node_type(g.data()) == node::NodeType::Leaf,
                node::size(g.data()),
            )
        };
        if is_leaf {
            if size == 0 {
                self.free_page(root)?;
                self.header.root_page_id = INVALID_PAGE;
                self.header.height = 0;
            }
        } else if size == 0 {
            let only_child = {
                let g = self.bpm.fetch_page_read(self.fid, root)?;
                node::internal_child_at(g.data(), 0)
            };
            {
                let mut cg = self.bpm.fetch_page_write(self.fid, only_child)?;
                node::set_parent(cg.data_mut(), INVALID_PAGE);
            }
            self.free_page(root)?;
            self.header.root_page_id = only_child;
            self.header.height = self.header.height.saturating_sub(1);
        }
        Ok(())
    }
}

pub struct BTreeIterator<'a> {
    index: &'a BTreeIndex,
    leaf_pid: PageId,
    slot: usize,
}

impl Iterator for BTreeIterator<'_> {
    type Item = Result<(Value, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.leaf_pid == INVALID_PAGE {
                return None;
            }
            let guard = match self.index.bpm.fetch_page_read(self.index.fid, self.leaf_pid) {
                Ok(g) => g,
                Err(e) => return Some(Err(e)),
            };
            let data = guard.data();
            let max = node::max_size(data);
            let size = node::size(data);
            let key_size = self.index.header.key_size as usize;
            if self.slot < size {
                let key_bytes = node::leaf_key_at(data, self.slot, max, key_size);
                let value = decode_key(key_bytes, &self.index.key_ty);
                let rid = node::leaf_rid_at(data, self.slot);
                self.slot += 1;
                return Some(Ok((value, rid)));
            }
            let next = node::leaf_next(data);
            self.leaf_pid = next;
            self.slot = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacer::Lru;
    use crate::disk_manager::{test_path, DiskManager};
    use crate::page::PAGE_SIZE;
    use std::fs;

    fn setup() -> (BTreeIndex, std::path::PathBuf) {
        let dir = test_path();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("idx.db");
        let bpm = BufferPoolManager::new(16, Box::new(Lru::new()), DiskManager::new());
        let index = BTreeIndex::create(bpm, &path, Type::Int32).unwrap();
        (index, dir)
    }

    #[test]
    fn scenario_four_search_and_range_after_many_inserts() {
        let (mut index, dir) = setup();
        for i in 0..100i32 {
            index.insert(&Value::Int32(i), (i, 0)).unwrap();
        }
        assert_eq!(index.len(), 100);

        for i in 0..100i32 {
            assert_eq!(index.search(&Value::Int32(i)).unwrap(), vec![(i, 0)]);
        }

        let range = index
            .search_range(&Value::Int32(10), &Value::Int32(19))
            .unwrap();
        let got: Vec<i32> = range
            .iter()
            .map(|(v, _)| match v {
                Value::Int32(n) => *n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, (10..20).collect::<Vec<_>>());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn delete_half_keeps_the_rest_searchable() {
        let (mut index, dir) = setup();
        for i in 0..50i32 {
            index.insert(&Value::Int32(i), (i, 0)).unwrap();
        }
        for i in (0..50i32).step_by(2) {
            index.delete(&Value::Int32(i)).unwrap();
        }
        assert_eq!(index.len(), 25);
        for i in 0..50i32 {
            let found = index.search(&Value::Int32(i)).unwrap();
            if i % 2 == 0 {
                assert!(found.is_empty());
            } else {
                assert_eq!(found, vec![(i, 0)]);
            }
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn begin_iterates_all_entries_in_order() {
        let (mut index, dir) = setup();
        for i in (0..30i32).rev() {
            index.insert(&Value::Int32(i), (i, 0)).unwrap();
        }
        let got: Vec<i32> = index
            .begin()
            .unwrap()
            .map(|r| match r.unwrap().0 {
                Value::Int32(n) => n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, (0..30).collect::<Vec<_>>());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn construction_fails_for_oversized_key() {
        let dir = test_path();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("idx.db");
        let bpm = BufferPoolManager::new(4, Box::new(Lru::new()), DiskManager::new());
        let err = BTreeIndex::create(bpm, &path, Type::Str(PAGE_SIZE)).unwrap_err();
        assert!(matches!(
            err.downcast::<Error>().unwrap(),
            Error::IndexFail(_)
        ));
        fs::remove_dir_all(&dir).ok();
    }
}
