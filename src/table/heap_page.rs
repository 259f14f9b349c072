//! Page-handle layouts: N-ary (row-major) and PAX (column-major within a
//! page) slot serialization (spec.md §4.5).
//!
//! No direct teacher precedent survives intact (the teacher's
//! `pages::table_page::TablePage` used a single `#[repr(C)]` + unsafe
//! transmute layout for one row-major format, and its node-page siblings
//! were internally inconsistent — see DESIGN.md). This module follows
//! Design Notes §9's replacement guidance directly: "explicit offset
//! computation and typed accessors over a raw page buffer" instead of
//! `#[repr(C)]` transmutes, generalized to the two storage models spec.md
//! names.

use crate::error::Error;
use crate::page::HEADER_SIZE;
use crate::record::schema::Schema;
use crate::record::value::Value;
use crate::page::PAGE_SIZE;
use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageModel {
    NAry,
    Pax,
}

/// Precomputed, schema-derived geometry for one heap page. Shared by both
/// storage models: the capacity formula in spec.md §4.5 is identical for
/// both ("maximal n such that header + bitmap + n*(record+null-map) fits"),
/// only the spatial arrangement of the n slots differs.
#[derive(Debug, Clone)]
pub struct PageLayout {
    model: StorageModel,
    records_per_page: usize,
    bitmap_bytes: usize,
    null_map_bytes: usize,
    record_len: usize,
    /// PAX only: byte offset of each column's array, relative to the start
    /// of the column region (i.e. after the occupancy bitmap and the
    /// contiguous null-map block).
    pax_column_offsets: Vec<usize>,
}

impl PageLayout {
    pub fn compute(schema: &Schema, model: StorageModel) -> Self {
        let record_len = schema.record_len();
        let null_map_bytes = schema.null_bitmap_bytes();
        let per_record = record_len + null_map_bytes;

        let mut n = 0usize;
        loop {
            let candidate = n + 1;
            let bitmap_bytes = candidate.div_ceil(8);
            if HEADER_SIZE + bitmap_bytes + candidate * per_record <= PAGE_SIZE {
                n = candidate;
            } else {
                break;
            }
        }
        let bitmap_bytes = n.div_ceil(8);

        let mut pax_column_offsets = Vec::with_capacity(schema.field_count());
        let mut off = 0;
        for field in schema.fields() {
            pax_column_offsets.push(off);
            off += field.ty.size() * n;
        }

        Self {
            model,
            records_per_page: n,
            bitmap_bytes,
            null_map_bytes,
            record_len,
            pax_column_offsets,
        }
    }

    pub fn records_per_page(&self) -> usize {
        self.records_per_page
    }

    pub fn bitmap_bytes(&self) -> usize {
        self.bitmap_bytes
    }

    fn bitmap_start(&self) -> usize {
        HEADER_SIZE
    }

    fn body_start(&self) -> usize {
        HEADER_SIZE + self.bitmap_bytes
    }

    pub fn is_occupied(&self, page: &[u8], slot: usize) -> bool {
        let byte = page[self.bitmap_start() + slot / 8];
        (byte >> (slot % 8)) & 1 == 1
    }

    pub fn set_occupied(&self, page: &mut [u8], slot: usize, occupied: bool) {
        let idx = self.bitmap_start() + slot / 8;
        if occupied {
            page[idx] |= 1 << (slot % 8);
        } else {
            page[idx] &= !(1 << (slot % 8));
        }
    }

    pub fn first_free_slot(&self, page: &[u8]) -> Option<usize> {
        (0..self.records_per_page).find(|&s| !self.is_occupied(page, s))
    }

    fn pax_null_maps_start(&self) -> usize {
        self.body_start()
    }

    fn pax_columns_start(&self) -> usize {
        self.body_start() + self.records_per_page * self.null_map_bytes
    }

    pub fn write_slot(
        &self,
        schema: &Schema,
        page: &mut [u8],
        slot: usize,
        null_bitmap: &[u8],
        payload: &[u8],
    ) {
        debug_assert!(slot < self.records_per_page);
        match self.model {
            StorageModel::NAry => {
                let base = self.body_start() + slot * (self.null_map_bytes + self.record_len);
                page[base..base + self.null_map_bytes].copy_from_slice(null_bitmap);
                page[base + self.null_map_bytes..base + self.null_map_bytes + self.record_len]
                    .copy_from_slice(payload);
            }
            StorageModel::Pax => {
                let nbase = self.pax_null_maps_start() + slot * self.null_map_bytes;
                page[nbase..nbase + self.null_map_bytes].copy_from_slice(null_bitmap);

                let columns_start = self.pax_columns_start();
                for (i, field) in schema.fields().iter().enumerate() {
                    let size = field.ty.size();
                    let src_off = schema.offset(i);
                    let dst = columns_start + self.pax_column_offsets[i] + slot * size;
                    page[dst..dst + size].copy_from_slice(&payload[src_off..src_off + size]);
                }
            }
        }
    }

    pub fn read_slot(&self, schema: &Schema, page: &[u8], slot: usize) -> (Vec<u8>, Vec<u8>) {
        debug_assert!(slot < self.records_per_page);
        match self.model {
            StorageModel::NAry => {
                let base = self.body_start() + slot * (self.null_map_bytes + self.record_len);
                let null_bitmap = page[base..base + self.null_map_bytes].to_vec();
                let payload =
                    page[base + self.null_map_bytes..base + self.null_map_bytes + self.record_len]
                        .to_vec();
                (null_bitmap, payload)
            }
            StorageModel::Pax => {
                let nbase = self.pax_null_maps_start() + slot * self.null_map_bytes;
                let null_bitmap = page[nbase..nbase + self.null_map_bytes].to_vec();

                let mut payload = vec![0u8; self.record_len];
                let columns_start = self.pax_columns_start();
                for (i, field) in schema.fields().iter().enumerate() {
                    let size = field.ty.size();
                    let src = columns_start + self.pax_column_offsets[i] + slot * size;
                    let dst_off = schema.offset(i);
                    payload[dst_off..dst_off + size].copy_from_slice(&page[src..src + size]);
                }
                (null_bitmap, payload)
            }
        }
    }

    /// PAX-only: an array-of-arrays view projecting the chosen columns for
    /// every occupied slot, reading each column as one contiguous scan
    /// rather than reassembling whole rows (spec.md §4.5 ReadChunk — the
    /// optimization PAX exists for).
    pub fn read_chunk(&self, schema: &Schema, page: &[u8], columns: &[&str]) -> Result<Vec<Vec<Value>>> {
        if self.model != StorageModel::Pax {
            bail!(Error::UnsupportedOp("ReadChunk requires PAX storage".into()));
        }
        let occupied: Vec<usize> = (0..self.records_per_page)
            .filter(|&s| self.is_occupied(page, s))
            .collect();

        let columns_start = self.pax_columns_start();
        let mut result = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = schema
                .field_index(name)
                .ok_or_else(|| Error::UnsupportedOp(format!("no such field: {name}")))?;
            let field = &schema.fields()[idx];
            let size = field.ty.size();
            let col_base = columns_start + self.pax_column_offsets[idx];

            let mut values = Vec::with_capacity(occupied.len());
            for &slot in &occupied {
                let null_base = self.pax_null_maps_start() + slot * self.null_map_bytes;
                let is_null = (page[null_base + idx / 8] >> (idx % 8)) & 1 == 1;
                if is_null {
                    values.push(Value::Null);
                } else {
                    let off = col_base + slot * size;
                    values.push(Value::from_bytes(&field.ty, &page[off..off + size]));
                }
            }
            result.push(values);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::value::Type;

    fn schema() -> Schema {
        Schema::new(vec![
            ("i".into(), Type::Int32, false),
            ("f".into(), Type::Float32, false),
        ])
    }

    #[test]
    fn nary_slot_round_trips() {
        let schema = schema();
        let layout = PageLayout::compute(&schema, StorageModel::NAry);
        let mut page = vec![0u8; PAGE_SIZE];
        let payload: Vec<u8> = [1i32.to_be_bytes(), 2.0f32.to_be_bytes()].concat();
        layout.write_slot(&schema, &mut page, 0, &[0u8], &payload);
        layout.set_occupied(&mut page, 0, true);
        let (null_map, read_back) = layout.read_slot(&schema, &page, 0);
        assert_eq!(null_map, vec![0u8]);
        assert_eq!(read_back, payload);
        assert!(layout.is_occupied(&page, 0));
    }

    #[test]
    fn pax_round_trips_and_read_chunk() {
        let schema = schema();
        let layout = PageLayout::compute(&schema, StorageModel::Pax);
        let mut page = vec![0u8; PAGE_SIZE];

        for (slot, (i, f)) in [(10, 1.0f32), (20, 2.0f32)].into_iter().enumerate() {
            let payload: Vec<u8> = [i.to_be_bytes(), f.to_be_bytes()].concat();
            layout.write_slot(&schema, &mut page, slot, &[0u8], &payload);
            layout.set_occupied(&mut page, slot, true);
        }

        let (_, payload0) = layout.read_slot(&schema, &page, 0);
        assert_eq!(&payload0[0..4], &10i32.to_be_bytes());

        let chunk = layout.read_chunk(&schema, &page, &["f"]).unwrap();
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk[0], vec![Value::Float32(1.0), Value::Float32(2.0)]);
    }
}
