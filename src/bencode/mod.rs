//! Bencode: BitTorrent's binary serialization format.
//!
//! A [`Value`] is a tagged sum of the four bencode variants. Decoding and
//! encoding are pure functions over byte buffers — no I/O happens here.
//! Dictionary keys are raw bytes, not text: non-UTF-8 keys show up in
//! practice and the codec must not choke on them.

use std::collections::BTreeMap;
use thiserror::Error;

mod decode;
mod encode;

pub use decode::decode;
pub use encode::encode;

/// A decoded bencode value.
///
/// Dictionaries are stored in a `BTreeMap` rather than a `HashMap` so that
/// the encoder's "keys sorted ascending by raw bytes" invariant (the one
/// that makes info-hash reproducible) is structural instead of an extra
/// sort pass bolted onto an unordered map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Convenience accessor: `dict.get(key)` on a dict value, `None` otherwise.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

/// Errors produced by the bencode codec itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed bencode: {0}")]
    Malformed(&'static str),
    #[error("trailing bytes after decoding a value")]
    TrailingBytes,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&[u8], Value)]) -> Value {
        Value::Dict(pairs.iter().map(|(k, v)| (k.to_vec(), v.clone())).collect())
    }

    #[test]
    fn encode_integer() {
        assert_eq!(encode(&Value::Int(42)), b"i42e");
        assert_eq!(encode(&Value::Int(-7)), b"i-7e");
        assert_eq!(encode(&Value::Int(0)), b"i0e");
    }

    #[test]
    fn encode_string() {
        assert_eq!(encode(&Value::Bytes(b"spam".to_vec())), b"4:spam");
    }

    #[test]
    fn encode_sorts_dict_keys() {
        let v = dict(&[(b"b", Value::Int(1)), (b"a", Value::Int(2))]);
        assert_eq!(encode(&v), b"d1:ai2e1:bi1ee");
    }

    #[test]
    fn decode_known_dict() {
        let input = b"d3:cow3:moo4:spam4:eggse";
        let v = decode(input).unwrap();
        let expected = dict(&[
            (b"cow", Value::Bytes(b"moo".to_vec())),
            (b"spam", Value::Bytes(b"eggs".to_vec())),
        ]);
        assert_eq!(v, expected);
    }

    #[test]
    fn round_trip_decode_encode_is_identity_on_canonical_input() {
        let input: &[u8] = b"d3:cow3:moo4:spam4:eggse";
        let decoded = decode(input).unwrap();
        assert_eq!(encode(&decoded), input);
    }

    #[test]
    fn round_trip_encode_decode_is_identity() {
        let v = Value::List(vec![
            Value::Int(1),
            Value::Bytes(b"two".to_vec()),
            dict(&[(b"three", Value::Int(3))]),
        ]);
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn rejects_leading_zero_integers() {
        assert!(decode(b"i03e").is_err());
    }

    #[test]
    fn rejects_negative_zero() {
        assert!(decode(b"i-0e").is_err());
    }

    #[test]
    fn rejects_truncated_string_length() {
        assert!(decode(b"5:ab").is_err());
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!(decode(b"x").is_err());
    }

    #[test]
    fn nested_list_and_dict() {
        let input = b"d4:listli1ei2eee";
        let v = decode(input).unwrap();
        let expected = dict(&[(
            b"list",
            Value::List(vec![Value::Int(1), Value::Int(2)]),
        )]);
        assert_eq!(v, expected);
    }
}
