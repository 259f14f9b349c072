//! Heap scan: `GetFirstRID`/`GetNextRID`-style iteration over a table's
//! pages in slot order (spec.md §4.6 "Iteration").
//!
//! Grounded on the teacher's `table/table_iterator.rs` for the general shape
//! (a cursor over `(page id, slot id)` advancing through a `Table`'s pages);
//! rebuilt against the free-slot bitmap semantics this crate actually uses.

use super::TableHandle;
use crate::page::{PageId, Rid};
use crate::record::Record;
use anyhow::Result;

pub struct TableIterator<'a> {
    handle: &'a TableHandle,
    current: Option<Rid>,
    started: bool,
}

impl<'a> TableIterator<'a> {
    pub fn new(handle: &'a TableHandle) -> Self {
        Self {
            handle,
            current: None,
            started: false,
        }
    }

    fn first_occupied_from(&self, start_page: PageId, start_slot: usize) -> Option<Rid> {
        let per_page = self.handle.layout().records_per_page();
        for pid in start_page..self.handle.page_count() as PageId {
            let guard = self.handle.bpm().fetch_page_read(self.handle.fid(), pid).ok()?;
            let from = if pid == start_page { start_slot } else { 0 };
            for slot in from..per_page {
                if self.handle.layout().is_occupied(guard.data(), slot) {
                    return Some((pid, slot as i32));
                }
            }
        }
        None
    }

    /// spec.md §4.6: "GetFirstRID() scans pages from 1 upward and returns
    /// the first set bit."
    pub fn get_first_rid(&self) -> Option<Rid> {
        self.first_occupied_from(1, 0)
    }

    /// spec.md §4.6: "GetNextRID(rid) continues in the same page, then
    /// moves on."
    pub fn get_next_rid(&self, rid: Rid) -> Option<Rid> {
        let (pid, slot) = rid;
        self.first_occupied_from(pid, slot as usize + 1)
    }
}

impl Iterator for TableIterator<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let next_rid = if !self.started {
            self.started = true;
            self.get_first_rid()
        } else {
            self.current.and_then(|rid| self.get_next_rid(rid))
        };
        self.current = next_rid;
        next_rid.map(|rid| self.handle.get_record(rid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacer::Lru;
    use crate::buffer::BufferPoolManager;
    use crate::disk_manager::{test_path, DiskManager};
    use crate::record::schema::Schema;
    use crate::record::value::{Type, Value};
    use crate::table::heap_page::StorageModel;
    use std::fs;

    #[test]
    fn iterates_in_slot_order_across_pages() {
        let dir = test_path();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scan.db");
        let bpm = BufferPoolManager::new(8, Box::new(Lru::new()), DiskManager::new());
        let schema = Schema::new(vec![("i".into(), Type::Int32, false)]);
        let mut handle = TableHandle::create(bpm, &path, schema, StorageModel::NAry).unwrap();
        let bound_schema = handle.schema().clone();

        let per_page = handle.layout().records_per_page();
        let mut expected = Vec::new();
        for i in 0..(per_page * 2 + 1) {
            let r = Record::from_values(&bound_schema, &[Value::Int32(i as i32)]).unwrap();
            handle.insert_record(&r).unwrap();
            expected.push(i as i32);
        }

        let got: Vec<i32> = TableIterator::new(&handle)
            .map(|r| match r.unwrap().value(&bound_schema, 0) {
                Value::Int32(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, expected);

        fs::remove_dir_all(&dir).ok();
    }
}
