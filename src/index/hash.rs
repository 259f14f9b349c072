//! Static bucketed hash index (spec.md §4.8).
//!
//! Grounded in the same "raw page buffer + explicit offsets" idiom as
//! `index::btree` and `table::heap_page`. Page 0 is the index header, page 1
//! is the bucket directory, and every bucket/overflow page reuses the shared
//! `PageHeader.next_free_page_id` field as its "next page in this bucket's
//! chain" pointer (distinct from the table module's use of the same field
//! for the heap's free-page chain — see DESIGN.md).

use crate::buffer::BufferPoolManager;
use crate::error::Error;
use crate::page::{FileId, PageHeader, PageId, Rid, HEADER_SIZE, INVALID_PAGE, PAGE_SIZE, RID_SIZE};
use crate::record::value::{Type, Value};
use anyhow::{bail, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use super::{decode_key, encode_key};

const DIRECTORY_PAGE: PageId = 1;
const HEADER_BYTES: usize = 28;

#[derive(Debug, Clone, Copy)]
struct Header {
    bucket_count: u32,
    total_entries: u64,
    first_free_page: PageId,
    page_count: u32,
    key_size: u32,
    value_size: u32,
}

impl Header {
    fn serialize(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        out[0..4].copy_from_slice(&self.bucket_count.to_be_bytes());
        out[4..12].copy_from_slice(&self.total_entries.to_be_bytes());
        out[12..16].copy_from_slice(&self.first_free_page.to_be_bytes());
        out[16..20].copy_from_slice(&self.page_count.to_be_bytes());
        out[20..24].copy_from_slice(&self.key_size.to_be_bytes());
        out[24..28].copy_from_slice(&self.value_size.to_be_bytes());
        out
    }

    fn deserialize(data: &[u8]) -> Self {
        Self {
            bucket_count: u32::from_be_bytes(data[0..4].try_into().unwrap()),
            total_entries: u64::from_be_bytes(data[4..12].try_into().unwrap()),
            first_free_page: PageId::from_be_bytes(data[12..16].try_into().unwrap()),
            page_count: u32::from_be_bytes(data[16..20].try_into().unwrap()),
            key_size: u32::from_be_bytes(data[20..24].try_into().unwrap()),
            value_size: u32::from_be_bytes(data[24..28].try_into().unwrap()),
        }
    }
}

fn entry_size(key_size: usize) -> usize {
    key_size + RID_SIZE
}

fn max_entries_per_page(key_size: usize) -> usize {
    (PAGE_SIZE - HEADER_SIZE) / entry_size(key_size)
}

fn entry_at(page: &[u8], i: usize, key_size: usize) -> (&[u8], Rid) {
    let base = HEADER_SIZE + i * entry_size(key_size);
    let key = &page[base..base + key_size];
    let rid = crate::page::rid_from_bytes(&page[base + key_size..base + key_size + RID_SIZE]);
    (key, rid)
}

fn set_entry_at(page: &mut [u8], i: usize, key_size: usize, key: &[u8], rid: Rid) {
    let base = HEADER_SIZE + i * entry_size(key_size);
    page[base..base + key_size].copy_from_slice(key);
    page[base + key_size..base + key_size + RID_SIZE].copy_from_slice(&crate::page::rid_to_bytes(rid));
}

fn hash_key_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

pub struct HashIndex {
    bpm: BufferPoolManager,
    fid: FileId,
    key_ty: Type,
    header: Header,
}

impl HashIndex {
    pub fn create(
        bpm: BufferPoolManager,
        path: impl AsRef<Path>,
        key_ty: Type,
        bucket_count: u32,
    ) -> Result<Self> {
        let key_size = key_ty.size();
        if max_entries_per_page(key_size) == 0 {
            bail!(Error::IndexFail("key type too large for one bucket page".into()));
        }
        if (bucket_count as usize) * 4 > PAGE_SIZE - HEADER_SIZE {
            bail!(Error::IndexFail(
                "bucket directory does not fit in one page".into()
            ));
        }

        bpm.create_file(&path)?;
        let fid = bpm.open_file(&path)?;
        let header = Header {
            bucket_count,
            total_entries: 0,
            first_free_page: INVALID_PAGE,
            page_count: 2, // page 0: header, page 1: directory
            key_size: key_size as u32,
            value_size: RID_SIZE as u32,
        };
        let index = Self {
            bpm,
            fid,
            key_ty,
            header,
        };
        index.flush_header()?;

        let mut guard = index.bpm.fetch_page_write(index.fid, DIRECTORY_PAGE)?;
        let data = guard.data_mut();
        for b in 0..bucket_count as usize {
            let off = HEADER_SIZE + b * 4;
            data[off..off + 4].copy_from_slice(&INVALID_PAGE.to_be_bytes());
        }
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
            .write_file_bytes(self.fid, &key_ty_bytes, HEADER_BYTES as u64)
    }

    pub fn len(&self) -> u64 {
        self.header.total_entries
    }

    pub fn is_empty(&self) -> bool {
        self.header.total_entries == 0
    }

    fn bucket_of(&self, key_bytes: &[u8]) -> usize {
        (hash_key_bytes(key_bytes) % self.header.bucket_count as u64) as usize
    }

    fn directory_entry(&self, bucket: usize) -> Result<PageId> {
        let guard = self.bpm.fetch_page_read(self.fid, DIRECTORY_PAGE)?;
        let off = HEADER_SIZE + bucket * 4;
        Ok(PageId::from_be_bytes(guard.data()[off..off + 4].try_into().unwrap()))
    }

    fn set_directory_entry(&self, bucket: usize, pid: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(self.fid, DIRECTORY_PAGE)?;
        let off = HEADER_SIZE + bucket * 4;
        guard.data_mut()[off..off + 4].copy_from_slice(&pid.to_be_bytes());
        Ok(())
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

    pub fn search(&self, key: &Value) -> Result<Vec<Rid>> {
        let key_bytes = encode_key(key, &self.key_ty);
        let key_size = self.header.key_size as usize;
        let bucket = self.bucket_of(&key_bytes);
        let mut pid = self.directory_entry(bucket)?;
        let mut out = Vec::new();
        while pid != INVALID_PAGE {
            let guard = self.bpm.fetch_page_read(self.fid, pid)?;
            let data = guard.data();
            let count = PageHeader::read(data).record_count as usize;
            for i in 0..count {
                let (k, rid) = entry_at(data, i, key_size);
                if k == key_bytes.as_slice() {
                    out.push(rid);
                }
            }
            pid = PageHeader::read(data).next_free_page_id;
        }
        Ok(out)
    }

    /// O(n) scan across every bucket chain; hash indexes have no inherent
    /// order, so range search exists only for interface parity with the
    /// B+ tree (spec.md §4.8).
    pub fn search_range(&self, low: &Value, high: &Value) -> Result<Vec<(Value, Rid)>> {
        let low_bytes = encode_key(low, &self.key_ty);
        let high_bytes = encode_key(high, &self.key_ty);
        let key_size = self.header.key_size as usize;
        let mut out = Vec::new();
        for bucket in 0..self.header.bucket_count as usize {
            let mut pid = self.directory_entry(bucket)?;
            while pid != INVALID_PAGE {
                let guard = self.bpm.fetch_page_read(self.fid, pid)?;
                let data = guard.data();
                let count = PageHeader::read(data).record_count as usize;
                for i in 0..count {
                    let (k, rid) = entry_at(data, i, key_size);
                    if k >= low_bytes.as_slice() && k <= high_bytes.as_slice() {
                        out.push((decode_key(k, &self.key_ty), rid));
                    }
                }
                pid = PageHeader::read(data).next_free_page_id;
            }
        }
        out.sort_by(|a, b| encode_key(&a.0, &self.key_ty).cmp(&encode_key(&b.0, &self.key_ty)));
        Ok(out)
    }

    pub fn insert(&mut self, key: &Value, rid: Rid) -> Result<()> {
        let key_bytes = encode_key(key, &self.key_ty);
        let key_size = self.header.key_size as usize;
        let max_entries = max_entries_per_page(key_size);
        let bucket = self.bucket_of(&key_bytes);

        let mut pid = self.directory_entry(bucket)?;
        if pid == INVALID_PAGE {
            let new_pid = self.alloc_page()?;
            self.init_bucket_page(new_pid)?;
            self.set_directory_entry(bucket, new_pid)?;
            pid = new_pid;
        }

        loop {
            let (count, next) = {
                let guard = self.bpm.fetch_page_read(self.fid, pid)?;
                let ph = PageHeader::read(guard.data());
                (ph.record_count as usize, ph.next_free_page_id)
            };
            if count < max_entries {
                let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
                let data = guard.data_mut();
                set_entry_at(data, count, key_size, &key_bytes, rid);
                let mut ph = PageHeader::read(data);
                ph.record_count += 1;
                ph.write(data);
                break;
            }
            if next == INVALID_PAGE {
                let new_pid = self.alloc_page()?;
                self.init_bucket_page(new_pid)?;
                let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
                let data = guard.data_mut();
                let mut ph = PageHeader::read(data);
                ph.next_free_page_id = new_pid;
                ph.write(data);
                pid = new_pid;
            } else {
                pid = next;
            }
        }

        self.header.total_entries += 1;
        self.flush_header()
    }

    fn init_bucket_page(&self, pid: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
        let data = guard.data_mut();
        let ph = PageHeader {
            lsn: 0,
            next_free_page_id: INVALID_PAGE,
            record_count: 0,
        };
        ph.write(data);
        Ok(())
    }

    /// Removes every (key, RID) pair whose key equals `key`, compacting each
    /// touched page in place; empty pages are left in the chain rather than
    /// freed (spec.md §4.8 Delete).
    pub fn delete(&mut self, key: &Value) -> Result<u64> {
        let key_bytes = encode_key(key, &self.key_ty);
        let key_size = self.header.key_size as usize;
        let bucket = self.bucket_of(&key_bytes);
        let mut pid = self.directory_entry(bucket)?;
        let mut removed = 0u64;

        while pid != INVALID_PAGE {
            let next;
            {
                let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
                let data = guard.data_mut();
                let count = PageHeader::read(data).record_count as usize;
                let mut kept = Vec::with_capacity(count);
                for i in 0..count {
                    let (k, rid) = entry_at(data, i, key_size);
                    if k == key_bytes.as_slice() {
                        removed += 1;
                    } else {
                        kept.push((k.to_vec(), rid));
                    }
                }
                for (i, (k, rid)) in kept.iter().enumerate() {
                    set_entry_at(data, i, key_size, k, *rid);
                }
                let mut ph = PageHeader::read(data);
                ph.record_count = kept.len() as u64;
                ph.write(data);
                next = ph.next_free_page_id;
            }
            pid = next;
        }

        self.header.total_entries = self.header.total_entries.saturating_sub(removed);
        self.flush_header()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacer::Lru;
    use crate::disk_manager::{test_path, DiskManager};
    use std::fs;

    fn setup(bucket_count: u32) -> (HashIndex, std::path::PathBuf) {
        let dir = test_path();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hash.db");
        let bpm = BufferPoolManager::new(16, Box::new(Lru::new()), DiskManager::new());
        let index = HashIndex::create(bpm, &path, Type::Int32, bucket_count).unwrap();
        (index, dir)
    }

    #[test]
    fn insert_and_search_with_overflow_chaining() {
        let (mut index, dir) = setup(4);
        for i in 0..200i32 {
            index.insert(&Value::Int32(i), (i, 0)).unwrap();
        }
        assert_eq!(index.len(), 200);
        for i in 0..200i32 {
            assert_eq!(index.search(&Value::Int32(i)).unwrap(), vec![(i, 0)]);
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn duplicates_allowed_and_delete_removes_all() {
        let (mut index, dir) = setup(4);
        index.insert(&Value::Int32(7), (1, 0)).unwrap();
        index.insert(&Value::Int32(7), (2, 0)).unwrap();
        index.insert(&Value::Int32(8), (3, 0)).unwrap();

        let mut found = index.search(&Value::Int32(7)).unwrap();
        found.sort();
        assert_eq!(found, vec![(1, 0), (2, 0)]);

        let removed = index.delete(&Value::Int32(7)).unwrap();
        assert_eq!(removed, 2);
        assert!(index.search(&Value::Int32(7)).unwrap().is_empty());
        assert_eq!(index.search(&Value::Int32(8)).unwrap(), vec![(3, 0)]);
        assert_eq!(index.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn search_range_scans_every_bucket() {
        let (mut index, dir) = setup(8);
        for i in 0..50i32 {
            index.insert(&Value::Int32(i), (i, 0)).unwrap();
        }
        let range = index
            .search_range(&Value::Int32(10), &Value::Int32(14))
            .unwrap();
        let got: Vec<i32> = range
            .iter()
            .map(|(v, _)| match v {
                Value::Int32(n) => *n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, vec![10, 11, 12, 13, 14]);
        fs::remove_dir_all(&dir).ok();
    }
}
