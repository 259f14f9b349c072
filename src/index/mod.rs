//! Secondary indexes: B+ tree and static hash (spec.md §4.7, §4.8).

pub mod btree;
pub mod hash;

use crate::record::value::{Type, Value};

/// Encodes a key value as order-preserving bytes for the fixed-size key
/// comparisons both index structures do. Plain big-endian already preserves
/// order for unsigned quantities and fixed-width strings; signed `Int32`
/// needs its sign bit flipped first so two's-complement negatives sort
/// before positives in a raw byte compare.
pub fn encode_key(value: &Value, ty: &Type) -> Vec<u8> {
    let mut buf = vec![0u8; ty.size()];
    value
        .to_bytes(ty, &mut buf)
        .expect("index key value must match the index's key type");
    if matches!(ty, Type::Int32) {
        buf[0] ^= 0x80;
    }
    buf
}

pub fn decode_key(bytes: &[u8], ty: &Type) -> Value {
    if matches!(ty, Type::Int32) {
        let mut buf = bytes.to_vec();
        buf[0] ^= 0x80;
        return Value::from_bytes(ty, &buf);
    }
    Value::from_bytes(ty, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_encoding_preserves_order() {
        let ty = Type::Int32;
        let a = encode_key(&Value::Int32(-5), &ty);
        let b = encode_key(&Value::Int32(3), &ty);
        assert!(a < b);
        assert_eq!(decode_key(&a, &ty), Value::Int32(-5));
    }
}
