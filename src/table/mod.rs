//! Table handle: heap-file metadata and record CRUD by RID (spec.md §4.6).
//!
//! Grounded on the teacher's `table/mod.rs` (`Table { name, first_page,
//! last_page, bpm, schema, index }`, a file-backed struct owning its schema
//! and delegating page I/O to the buffer pool). The teacher threads variable-
//! length strings through a side-channel "blob page" (`insert_string`); this
//! is dropped because spec.md's string type is a fixed-width `char[n]`
//! (§8 scenario 3: `s:char[8]`), so no blob indirection is needed.

pub mod heap_page;
pub mod iterator;

use crate::buffer::BufferPoolManager;
use crate::error::Error;
use crate::page::{FileId, PageHeader, PageId, Rid, INVALID_PAGE};
use crate::record::schema::Schema;
use crate::record::Record;
use anyhow::{bail, Result};
use heap_page::{PageLayout, StorageModel};
use std::path::Path;

const TABLE_HEADER_BYTES: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub page_count: u32,
    pub first_free_page: PageId,
    pub record_count: u64,
    pub record_size: u64,
    pub records_per_page: u64,
    pub field_count: u64,
    pub bitmap_size: u64,
    pub null_map_size: u64,
}

impl TableHeader {
    fn serialize(&self) -> [u8; TABLE_HEADER_BYTES] {
        let mut out = [0u8; TABLE_HEADER_BYTES];
        out[0..4].copy_from_slice(&self.page_count.to_be_bytes());
        out[4..8].copy_from_slice(&self.first_free_page.to_be_bytes());
        out[8..16].copy_from_slice(&self.record_count.to_be_bytes());
        out[16..24].copy_from_slice(&self.record_size.to_be_bytes());
        out[24..32].copy_from_slice(&self.records_per_page.to_be_bytes());
        out[32..40].copy_from_slice(&self.field_count.to_be_bytes());
        out[40..48].copy_from_slice(&self.bitmap_size.to_be_bytes());
        out[48..56].copy_from_slice(&self.null_map_size.to_be_bytes());
        out
    }

    fn deserialize(data: &[u8]) -> Self {
        Self {
            page_count: u32::from_be_bytes(data[0..4].try_into().unwrap()),
            first_free_page: PageId::from_be_bytes(data[4..8].try_into().unwrap()),
            record_count: u64::from_be_bytes(data[8..16].try_into().unwrap()),
            record_size: u64::from_be_bytes(data[16..24].try_into().unwrap()),
            records_per_page: u64::from_be_bytes(data[24..32].try_into().unwrap()),
            field_count: u64::from_be_bytes(data[32..40].try_into().unwrap()),
            bitmap_size: u64::from_be_bytes(data[40..48].try_into().unwrap()),
            null_map_size: u64::from_be_bytes(data[48..56].try_into().unwrap()),
        }
    }
}

pub struct TableHandle {
    bpm: BufferPoolManager,
    fid: FileId,
    schema: Schema,
    model: StorageModel,
    layout: PageLayout,
    header: TableHeader,
}

impl TableHandle {
    pub fn create(
        bpm: BufferPoolManager,
        path: impl AsRef<Path>,
        mut schema: Schema,
        model: StorageModel,
    ) -> Result<Self> {
        bpm.create_file(&path)?;
        let fid = bpm.open_file(&path)?;
        schema.bind(fid);
        let layout = PageLayout::compute(&schema, model);

        let header = TableHeader {
            page_count: 1,
            first_free_page: INVALID_PAGE,
            record_count: 0,
            record_size: schema.record_len() as u64,
            records_per_page: layout.records_per_page() as u64,
            field_count: schema.field_count() as u64,
            bitmap_size: layout.bitmap_bytes() as u64,
            null_map_size: schema.null_bitmap_bytes() as u64,
        };

        let mut handle = Self {
            bpm,
            fid,
            schema,
            model,
            layout,
            header,
        };
        handle.flush_header()?;
        Ok(handle)
    }

    pub fn open(
        bpm: BufferPoolManager,
        path: impl AsRef<Path>,
        model: StorageModel,
    ) -> Result<Self> {
        let fid = bpm.open_file(&path)?;

        let mut header_bytes = [0u8; TABLE_HEADER_BYTES];
        bpm.read_file_bytes(fid, &mut header_bytes, 0)?;
        let header = TableHeader::deserialize(&header_bytes);

        // the schema's own length isn't known ahead of time; read the rest
        // of the header page and let Schema::deserialize consume what it
        // needs. The header page is small (one page), so this is cheap.
        let mut rest = vec![0u8; crate::page::PAGE_SIZE - TABLE_HEADER_BYTES];
        bpm.read_file_bytes(fid, &mut rest, TABLE_HEADER_BYTES as u64)?;
        let mut schema = Schema::deserialize(&rest)?;
        schema.bind(fid);

        let layout = PageLayout::compute(&schema, model);
        Ok(Self {
            bpm,
            fid,
            schema,
            model,
            layout,
            header,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn model(&self) -> StorageModel {
        self.model
    }

    pub fn fid(&self) -> FileId {
        self.fid
    }

    fn flush_header(&self) -> Result<()> {
        self.bpm.write_file_bytes(self.fid, &self.header.serialize(), 0)?;
        let schema_bytes = self.schema.serialize();
        self.bpm
            .write_file_bytes(self.fid, &schema_bytes, TABLE_HEADER_BYTES as u64)?;
        Ok(())
    }

    pub fn get_record(&self, rid: Rid) -> Result<Record> {
        let (pid, slot) = rid;
        let guard = self.bpm.fetch_page_read(self.fid, pid)?;
        if !self.layout.is_occupied(guard.data(), slot as usize) {
            bail!(Error::RecordMiss);
        }
        let (null_bitmap, payload) = self.layout.read_slot(&self.schema, guard.data(), slot as usize);
        Ok(Record::from_bytes(rid, &null_bitmap, &payload))
    }

    /// Returns the head of the free-page chain, allocating a fresh page if
    /// the chain is empty (spec.md §4.6 "Page allocation algorithm").
    fn page_with_free_slot(&mut self) -> Result<PageId> {
        if self.header.first_free_page != INVALID_PAGE {
            return Ok(self.header.first_free_page);
        }

        let new_id = self.header.page_count as PageId;
        self.header.page_count += 1;

        let mut guard = self.bpm.fetch_page_write(self.fid, new_id)?;
        let data = guard.data_mut();
        let page_header = PageHeader {
            lsn: 0,
            next_free_page_id: INVALID_PAGE,
            record_count: 0,
        };
        page_header.write(data);
        drop(guard);

        self.header.first_free_page = new_id;
        self.flush_header()?;
        Ok(new_id)
    }

    pub fn insert_record(&mut self, record: &Record) -> Result<Rid> {
        let pid = self.page_with_free_slot()?;
        let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
        let data = guard.data_mut();

        let slot = self
            .layout
            .first_free_slot(data)
            .expect("page_with_free_slot guarantees a free slot");
        self.layout
            .write_slot(&self.schema, data, slot, record.null_bitmap(), record.payload());
        self.layout.set_occupied(data, slot, true);

        let mut page_header = PageHeader::read(data);
        page_header.record_count += 1;
        page_header.write(data);
        let became_full = self.layout.first_free_slot(data).is_none();
        let next_free = page_header.next_free_page_id;
        drop(guard);

        if became_full {
            self.header.first_free_page = next_free;
        }
        self.header.record_count += 1;
        self.flush_header()?;

        Ok((pid, slot as i32))
    }

    /// Inserts at a caller-chosen RID; fails if the slot is occupied or the
    /// page hasn't been allocated yet (spec.md §4.6).
    pub fn insert_record_at(&mut self, rid: Rid, record: &Record) -> Result<()> {
        let (pid, slot) = rid;
        if pid < 1 || pid as u32 >= self.header.page_count {
            bail!(Error::PageMiss);
        }
        let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
        let data = guard.data_mut();
        if self.layout.is_occupied(data, slot as usize) {
            bail!(Error::RecordExists);
        }
        self.layout
            .write_slot(&self.schema, data, slot as usize, record.null_bitmap(), record.payload());
        self.layout.set_occupied(data, slot as usize, true);

        let mut page_header = PageHeader::read(data);
        page_header.record_count += 1;
        page_header.write(data);
        let became_full = self.layout.first_free_slot(data).is_none();
        let next_free = page_header.next_free_page_id;
        drop(guard);

        if became_full && self.header.first_free_page == pid {
            self.header.first_free_page = next_free;
        }
        self.header.record_count += 1;
        self.flush_header()
    }

    pub fn update_record(&mut self, rid: Rid, record: &Record) -> Result<()> {
        let (pid, slot) = rid;
        let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
        let data = guard.data_mut();
        if !self.layout.is_occupied(data, slot as usize) {
            bail!(Error::RecordMiss);
        }
        self.layout
            .write_slot(&self.schema, data, slot as usize, record.null_bitmap(), record.payload());
        Ok(())
    }

    pub fn delete_record(&mut self, rid: Rid) -> Result<()> {
        let (pid, slot) = rid;
        let mut guard = self.bpm.fetch_page_write(self.fid, pid)?;
        let data = guard.data_mut();
        if !self.layout.is_occupied(data, slot as usize) {
            bail!(Error::RecordMiss);
        }
        let was_full = self.layout.first_free_slot(data).is_none();
        self.layout.set_occupied(data, slot as usize, false);

        let mut page_header = PageHeader::read(data);
        page_header.record_count = page_header.record_count.saturating_sub(1);
        if was_full {
            page_header.next_free_page_id = self.header.first_free_page;
        }
        page_header.write(data);
        drop(guard);

        if was_full {
            self.header.first_free_page = pid;
        }
        self.header.record_count = self.header.record_count.saturating_sub(1);
        self.flush_header()
    }

    pub(crate) fn page_count(&self) -> u32 {
        self.header.page_count
    }

    pub(crate) fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub(crate) fn bpm(&self) -> &BufferPoolManager {
        &self.bpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacer::Lru;
    use crate::disk_manager::{test_path, DiskManager};
    use crate::record::value::{Type, Value};
    use std::fs;

    fn setup() -> (TableHandle, std::path::PathBuf) {
        let dir = test_path();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("heap.db");
        let bpm = BufferPoolManager::new(8, Box::new(Lru::new()), DiskManager::new());
        let schema = Schema::new(vec![
            ("i".into(), Type::Int32, false),
            ("f".into(), Type::Float32, false),
            ("s".into(), Type::Str(8), false),
        ]);
        let handle = TableHandle::create(bpm, &path, schema, StorageModel::NAry).unwrap();
        (handle, dir)
    }

    #[test]
    fn scenario_three_insert_get_update_delete() {
        let (mut handle, dir) = setup();
        let schema = handle.schema().clone();

        let r = Record::from_values(
            &schema,
            &[Value::Int32(1), Value::Float32(1.5), Value::Str("abc".into())],
        )
        .unwrap();
        let rid = handle.insert_record(&r).unwrap();

        let got = handle.get_record(rid).unwrap();
        assert!(got.data_eq(&r));

        let updated = Record::from_values(
            &schema,
            &[Value::Int32(2), Value::Float32(2.5), Value::Str("xy".into())],
        )
        .unwrap();
        handle.update_record(rid, &updated).unwrap();
        let got = handle.get_record(rid).unwrap();
        assert!(got.data_eq(&updated));

        handle.delete_record(rid).unwrap();
        let err = handle.get_record(rid).unwrap_err();
        assert!(matches!(err.downcast::<Error>().unwrap(), Error::RecordMiss));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn free_page_chain_reuses_slots() {
        let (mut handle, dir) = setup();
        let schema = handle.schema().clone();
        let record =
            Record::from_values(&schema, &[Value::Int32(0), Value::Float32(0.0), Value::Str("".into())])
                .unwrap();

        let per_page = handle.layout().records_per_page();
        let mut rids = Vec::new();
        for _ in 0..per_page {
            rids.push(handle.insert_record(&record).unwrap());
        }
        assert_eq!(handle.page_count(), 2); // header page + one full data page

        handle.delete_record(rids[0]).unwrap();
        let new_rid = handle.insert_record(&record).unwrap();
        assert_eq!(new_rid, rids[0]); // reused the freed slot, no new page

        fs::remove_dir_all(&dir).ok();
    }
}
