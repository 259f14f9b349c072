//! The record: a schema-typed tuple with a null bitmap and RID (spec.md §3
//! "Record").
//!
//! The teacher's `tuple/mod.rs` pairs a `_null_bitmap: u64` with a raw
//! `Box<[u8]>` payload; this keeps that two-buffer shape but replaces the
//! fixed `u64` bitmap with a `Box<[u8]>` sized to the schema's field count
//! (the teacher's fixed-width bitmap caps a record at 64 fields, which
//! spec.md's `⌈field-count / 8⌉` formula does not assume).

pub mod schema;
pub mod value;

use crate::error::Error;
use crate::page::{Rid, INVALID_RID};
use anyhow::{bail, Result};
use schema::Schema;
use value::Value;

#[derive(Debug, Clone)]
pub struct Record {
    pub rid: Rid,
    payload: Box<[u8]>,
    null_bitmap: Box<[u8]>,
}

impl Record {
    /// Builds a record from typed values, coercing int↔float per field and
    /// rejecting nulls in non-nullable fields (spec.md §3, §7 UNEXPECTED_NULL).
    pub fn from_values(schema: &Schema, values: &[Value]) -> Result<Record> {
        if values.len() != schema.field_count() {
            bail!(Error::RecLenError);
        }
        let mut payload = vec![0u8; schema.record_len()].into_boxed_slice();
        let mut null_bitmap = vec![0u8; schema.null_bitmap_bytes()].into_boxed_slice();

        for (i, (field, value)) in schema.fields().iter().zip(values).enumerate() {
            if matches!(value, Value::Null) {
                if !field.nullable {
                    bail!(Error::UnexpectedNull(field.name.clone()));
                }
                null_bitmap[i / 8] |= 1 << (i % 8);
                continue;
            }
            let coerced = value.coerce(&field.ty)?;
            let off = schema.offset(i);
            let size = field.ty.size();
            coerced.to_bytes(&field.ty, &mut payload[off..off + size])?;
        }

        Ok(Record {
            rid: INVALID_RID,
            payload,
            null_bitmap,
        })
    }

    /// Wraps already-serialized slot bytes read off a page (spec.md §3
    /// Record: "Construction modes: from raw bytes").
    pub fn from_bytes(rid: Rid, null_bitmap: &[u8], payload: &[u8]) -> Record {
        Record {
            rid,
            payload: payload.to_vec().into_boxed_slice(),
            null_bitmap: null_bitmap.to_vec().into_boxed_slice(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn null_bitmap(&self) -> &[u8] {
        &self.null_bitmap
    }

    pub fn is_null(&self, idx: usize) -> bool {
        (self.null_bitmap[idx / 8] >> (idx % 8)) & 1 == 1
    }

    pub fn value(&self, schema: &Schema, idx: usize) -> Value {
        if self.is_null(idx) {
            return Value::Null;
        }
        let field = &schema.fields()[idx];
        let off = schema.offset(idx);
        let size = field.ty.size();
        Value::from_bytes(&field.ty, &self.payload[off..off + size])
    }

    pub fn values(&self, schema: &Schema) -> Vec<Value> {
        (0..schema.field_count())
            .map(|i| self.value(schema, i))
            .collect()
    }

    /// Projects onto a subset schema (spec.md §3 Record: "from a subset
    /// schema of another record").
    pub fn project(&self, schema: &Schema, out_schema: &Schema) -> Result<Record> {
        let values: Vec<Value> = out_schema
            .fields()
            .iter()
            .map(|f| {
                let idx = schema
                    .field_index(&f.name)
                    .expect("projected field must exist in source schema");
                self.value(schema, idx)
            })
            .collect();
        Record::from_values(out_schema, &values)
    }

    /// Concatenates two records under the schema produced by
    /// `Schema::concat` (spec.md §3 Record: "from two records' concatenation").
    pub fn concat(
        a: &Record,
        a_schema: &Schema,
        b: &Record,
        b_schema: &Schema,
        out_schema: &Schema,
    ) -> Result<Record> {
        let mut values = a.values(a_schema);
        values.extend(b.values(b_schema));
        Record::from_values(out_schema, &values)
    }

    /// Equality compares payload and null map; schema identity is the
    /// caller's responsibility (the same `&Schema` must be passed to both
    /// sides being compared — spec.md §3: "Equality compares schema
    /// identity, payload, and null map").
    pub fn data_eq(&self, other: &Record) -> bool {
        self.payload == other.payload && self.null_bitmap == other.null_bitmap
    }

    /// Mixes each non-null field by type (spec.md §3 Record: "Hash mixes
    /// each non-null field by type").
    pub fn hash(&self, schema: &Schema) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::Hasher;

        let mut hasher = DefaultHasher::new();
        for (i, field) in schema.fields().iter().enumerate() {
            if self.is_null(i) {
                continue;
            }
            self.value(schema, i).hash_into(&field.ty, &mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use value::Type;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            ("i".into(), Type::Int32, false),
            ("f".into(), Type::Float32, false),
            ("s".into(), Type::Str(8), false),
        ])
    }

    #[test]
    fn round_trips_through_bytes() {
        let schema = sample_schema();
        let r = Record::from_values(
            &schema,
            &[Value::Int32(1), Value::Float32(1.5), Value::Str("abc".into())],
        )
        .unwrap();
        let r2 = Record::from_bytes(r.rid, r.null_bitmap(), r.payload());
        assert!(r.data_eq(&r2));
        assert_eq!(r2.value(&schema, 0), Value::Int32(1));
        assert_eq!(r2.value(&schema, 2), Value::Str("abc".into()));
    }

    #[test]
    fn null_in_non_nullable_field_rejected() {
        let schema = sample_schema();
        let err = Record::from_values(
            &schema,
            &[Value::Null, Value::Float32(1.0), Value::Str("x".into())],
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast::<Error>().unwrap(),
            Error::UnexpectedNull(_)
        ));
    }

    #[test]
    fn hash_ignores_nulls_consistently() {
        let schema = Schema::new(vec![
            ("i".into(), Type::Int32, true),
            ("s".into(), Type::Str(4), false),
        ]);
        let a = Record::from_values(&schema, &[Value::Null, Value::Str("ab".into())]).unwrap();
        let b = Record::from_values(&schema, &[Value::Null, Value::Str("ab".into())]).unwrap();
        assert_eq!(a.hash(&schema), b.hash(&schema));
    }
}
