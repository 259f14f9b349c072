//! Field and schema: ordered typed fields with derived offsets (spec.md §3).
//!
//! Grounded on the teacher's `tuple/schema.rs` for the general shape (a
//! schema is a named, ordered list of typed fields owned by the table), but
//! the teacher's actual field list was just `Vec<String>` + `Vec<Types>` with
//! no derived offsets or table-id binding — this rebuilds it to match
//! spec.md's "Record schema" paragraph literally: schemas are immutable once
//! bound and carry `field.table_id` per §3's invariant list.

use super::value::Type;
use crate::error::Error;
use crate::page::{FileId, INVALID_FILE};
use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub table_id: FileId,
    pub name: String,
    pub ty: Type,
    pub nullable: bool,
}

/// An ordered, immutable-once-bound list of typed fields. Held by a table or
/// index handle; the record layer only ever sees a `&Schema` borrow (Design
/// Notes §9: records are move-only values, schemas are non-owning references
/// tied to the handle that owns them).
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
    offsets: Vec<usize>,
    record_len: usize,
}

impl Schema {
    pub fn new(fields: Vec<(String, Type, bool)>) -> Self {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut built = Vec::with_capacity(fields.len());
        for (name, ty, nullable) in fields {
            offsets.push(offset);
            offset += ty.size();
            built.push(Field {
                table_id: INVALID_FILE,
                name,
                ty,
                nullable,
            });
        }
        Self {
            fields: built,
            offsets,
            record_len: offset,
        }
    }

    /// Stamps every field with the owning table's file id, satisfying
    /// spec.md §3's invariant "field.table_id equals the file id of the
    /// owning table." Called once, when the schema is bound to a table or
    /// index at creation/open time.
    pub fn bind(&mut self, table_id: FileId) {
        for f in &mut self.fields {
            f.table_id = table_id;
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn offset(&self, idx: usize) -> usize {
        self.offsets[idx]
    }

    pub fn null_bitmap_bytes(&self) -> usize {
        self.field_count().div_ceil(8)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Builds a schema over a subset of this schema's fields, preserving
    /// order (spec.md §3 Record: "from a subset schema of another record
    /// (projection)").
    pub fn project(&self, names: &[&str]) -> Result<Schema> {
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            let idx = self
                .field_index(name)
                .with_context(|| Error::UnsupportedOp(format!("no such field: {name}")))?;
            let f = &self.fields[idx];
            fields.push((f.name.clone(), f.ty.clone(), f.nullable));
        }
        let mut schema = Schema::new(fields);
        if let Some(table_id) = self.fields.first().map(|f| f.table_id) {
            schema.bind(table_id);
        }
        Ok(schema)
    }

    /// Builds the schema resulting from concatenating two records (spec.md
    /// §3 Record: "from two records' concatenation").
    pub fn concat(a: &Schema, b: &Schema) -> Schema {
        let mut fields = Vec::with_capacity(a.field_count() + b.field_count());
        for f in a.fields.iter().chain(b.fields.iter()) {
            fields.push((f.name.clone(), f.ty.clone(), f.nullable));
        }
        Schema::new(fields)
    }

    /// `[u64 field count][field*]`, field = `[name, NUL][u32 type tag][u64 size]`
    /// (spec.md §6). Nullability is packed into the tag's high bit since the
    /// wire format has no separate slot for it.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.fields.len() as u64).to_be_bytes());
        for field in &self.fields {
            out.extend_from_slice(field.name.as_bytes());
            out.push(0);
            let mut tag = field.ty.tag();
            if field.nullable {
                tag |= 0x8000_0000;
            }
            out.extend_from_slice(&tag.to_be_bytes());
            out.extend_from_slice(&(field.ty.size() as u64).to_be_bytes());
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Schema> {
        let mut pos = 0;
        let count = u64::from_be_bytes(
            data[0..8]
                .try_into()
                .map_err(|_| Error::UnsupportedOp("truncated schema header".into()))?,
        );
        pos += 8;

        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let nul = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::UnsupportedOp("unterminated field name".into()))?;
            let name = String::from_utf8_lossy(&data[pos..pos + nul]).into_owned();
            pos += nul + 1;

            let tag_raw = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let size = u64::from_be_bytes(data[pos..pos + 8].try_into().unwrap());
            pos += 8;

            let nullable = tag_raw & 0x8000_0000 != 0;
            let ty = Type::from_tag(tag_raw & 0x7fff_ffff, size);
            fields.push((name, ty, nullable));
        }
        Ok(Schema::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            ("i".into(), Type::Int32, false),
            ("f".into(), Type::Float32, false),
            ("s".into(), Type::Str(8), true),
        ])
    }

    #[test]
    fn offsets_and_len() {
        let s = sample();
        assert_eq!(s.offset(0), 0);
        assert_eq!(s.offset(1), 4);
        assert_eq!(s.offset(2), 8);
        assert_eq!(s.record_len(), 16);
        assert_eq!(s.null_bitmap_bytes(), 1);
    }

    #[test]
    fn serialize_round_trips() {
        let s = sample();
        let bytes = s.serialize();
        let back = Schema::deserialize(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn project_keeps_order() {
        let s = sample();
        let p = s.project(&["s", "i"]).unwrap();
        assert_eq!(p.field_count(), 2);
        assert_eq!(p.fields()[0].name, "s");
        assert_eq!(p.fields()[1].name, "i");
    }
}
