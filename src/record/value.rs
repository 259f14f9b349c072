//! Logical types and typed values (spec.md §3 "Record schema").
//!
//! The teacher's `tuple/types.rs` / `types/mod.rs` model each primitive as a
//! newtype wrapping a `Primitive` trait (`to_bytes`/`from_bytes` via
//! `to_ne_bytes`); this module keeps that per-type byte-conversion idiom but
//! collapses the newtypes into one `Value` sum type per Design Notes §9
//! ("closed sum types... a fixed small number of variants"), and switches to
//! big-endian so on-disk bytes compare the same way the values order (useful
//! for the B+ tree's fixed-size key comparisons).

use crate::error::Error;
use anyhow::{bail, Result};

/// Logical type of a field, carrying the extra size/shape a fixed-width
/// on-disk layout needs (spec.md §3: "logical type ∈ {null, bool, int32,
/// float32, string, array}").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Null,
    Bool,
    Int32,
    Float32,
    /// Fixed-capacity byte string; shorter values are NUL-padded.
    Str(usize),
    /// Fixed-length array of a scalar element type (arrays of arrays or of
    /// strings are not supported — element size must be statically known
    /// from the tag alone for the wire encoding in `schema::Type::tag`).
    Array(Box<Type>, usize),
}

impl Type {
    pub fn size(&self) -> usize {
        match self {
            Type::Null => 0,
            Type::Bool => 1,
            Type::Int32 => 4,
            Type::Float32 => 4,
            Type::Str(n) => *n,
            Type::Array(elem, len) => elem.size() * len,
        }
    }

    pub(crate) fn tag(&self) -> u32 {
        match self {
            Type::Null => 0,
            Type::Bool => 1,
            Type::Int32 => 2,
            Type::Float32 => 3,
            Type::Str(_) => 4,
            Type::Array(elem, _) => 10 + elem.tag(),
        }
    }

    pub(crate) fn from_tag(tag: u32, size: u64) -> Type {
        match tag {
            0 => Type::Null,
            1 => Type::Bool,
            2 => Type::Int32,
            3 => Type::Float32,
            4 => Type::Str(size as usize),
            t if t >= 10 => {
                let elem = Type::from_tag(t - 10, 0);
                let elem_size = elem.size().max(1);
                Type::Array(Box::new(elem), size as usize / elem_size)
            }
            _ => Type::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Float32(f32),
    Str(String),
    Array(Vec<Value>),
}

impl Value {
    /// Coerces self to the target type, allowing int↔float on the caller's
    /// behalf (spec.md §3 Record construction: "with type coercion int↔float
    /// ... as specified by the value module").
    pub fn coerce(&self, ty: &Type) -> Result<Value> {
        match (self, ty) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Bool(b), Type::Bool) => Ok(Value::Bool(*b)),
            (Value::Int32(i), Type::Int32) => Ok(Value::Int32(*i)),
            (Value::Int32(i), Type::Float32) => Ok(Value::Float32(*i as f32)),
            (Value::Float32(f), Type::Float32) => Ok(Value::Float32(*f)),
            (Value::Float32(f), Type::Int32) => Ok(Value::Int32(*f as i32)),
            (Value::Str(s), Type::Str(max)) => {
                if s.len() > *max {
                    bail!(Error::StringOverflow(*max, s.len()));
                }
                Ok(Value::Str(s.clone()))
            }
            (Value::Array(items), Type::Array(elem_ty, len)) => {
                if items.len() != *len {
                    bail!(Error::TypeMismatch(
                        format!("array[{len}]"),
                        format!("array[{}]", items.len())
                    ));
                }
                let coerced = items
                    .iter()
                    .map(|v| v.coerce(elem_ty))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(coerced))
            }
            (v, t) => bail!(Error::TypeMismatch(format!("{t:?}"), format!("{v:?}"))),
        }
    }

    pub fn to_bytes(&self, ty: &Type, out: &mut [u8]) -> Result<()> {
        debug_assert_eq!(out.len(), ty.size());
        match (self, ty) {
            (Value::Null, _) => {
                out.fill(0);
                Ok(())
            }
            (Value::Bool(b), Type::Bool) => {
                out[0] = *b as u8;
                Ok(())
            }
            (Value::Int32(i), Type::Int32) => {
                out.copy_from_slice(&i.to_be_bytes());
                Ok(())
            }
            (Value::Float32(f), Type::Float32) => {
                out.copy_from_slice(&f.to_be_bytes());
                Ok(())
            }
            (Value::Str(s), Type::Str(max)) => {
                let bytes = s.as_bytes();
                if bytes.len() > *max {
                    bail!(Error::StringOverflow(*max, bytes.len()));
                }
                out.fill(0);
                out[..bytes.len()].copy_from_slice(bytes);
                Ok(())
            }
            (Value::Array(items), Type::Array(elem_ty, len)) => {
                let elem_size = elem_ty.size();
                for (i, item) in items.iter().enumerate().take(*len) {
                    item.to_bytes(elem_ty, &mut out[i * elem_size..(i + 1) * elem_size])?;
                }
                Ok(())
            }
            (v, t) => bail!(Error::TypeMismatch(format!("{t:?}"), format!("{v:?}"))),
        }
    }

    pub fn from_bytes(ty: &Type, data: &[u8]) -> Value {
        match ty {
            Type::Null => Value::Null,
            Type::Bool => Value::Bool(data[0] != 0),
            Type::Int32 => Value::Int32(i32::from_be_bytes(data[0..4].try_into().unwrap())),
            Type::Float32 => Value::Float32(f32::from_be_bytes(data[0..4].try_into().unwrap())),
            Type::Str(n) => {
                let end = data[..*n].iter().position(|&b| b == 0).unwrap_or(*n);
                Value::Str(String::from_utf8_lossy(&data[..end]).into_owned())
            }
            Type::Array(elem_ty, len) => {
                let elem_size = elem_ty.size();
                let items = (0..*len)
                    .map(|i| Value::from_bytes(elem_ty, &data[i * elem_size..(i + 1) * elem_size]))
                    .collect();
                Value::Array(items)
            }
        }
    }

    /// Mixes this value into a running hash, by type (spec.md §3 Record.Hash:
    /// "Hash mixes each non-null field by type").
    pub fn hash_into(&self, ty: &Type, hasher: &mut impl std::hash::Hasher) {
        use std::hash::Hash;
        match self {
            Value::Null => 0u8.hash(hasher),
            Value::Bool(b) => b.hash(hasher),
            Value::Int32(i) => i.hash(hasher),
            Value::Float32(f) => f.to_bits().hash(hasher),
            Value::Str(s) => s.hash(hasher),
            Value::Array(items) => {
                if let Type::Array(elem_ty, _) = ty {
                    for item in items {
                        item.hash_into(elem_ty, hasher);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_to_float_coercion() {
        let v = Value::Int32(3).coerce(&Type::Float32).unwrap();
        assert_eq!(v, Value::Float32(3.0));
    }

    #[test]
    fn string_overflow_rejected() {
        let err = Value::Str("abcdef".into())
            .coerce(&Type::Str(3))
            .unwrap_err();
        assert!(matches!(
            err.downcast::<Error>().unwrap(),
            Error::StringOverflow(3, 6)
        ));
    }

    #[test]
    fn string_round_trips_with_padding() {
        let ty = Type::Str(8);
        let mut buf = [0u8; 8];
        Value::Str("abc".into()).to_bytes(&ty, &mut buf).unwrap();
        assert_eq!(Value::from_bytes(&ty, &buf), Value::Str("abc".into()));
    }

    #[test]
    fn tag_round_trips() {
        let ty = Type::Array(Box::new(Type::Int32), 4);
        let (tag, size) = (ty.tag(), ty.size() as u64);
        assert_eq!(Type::from_tag(tag, size), ty);
    }
}
