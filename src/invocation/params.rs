// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Parameter-set representation.
//!
//! The wire layout of an individual parameter is out of scope for this
//! crate (it is opaque to the invocation codec); what this module owns is
//! the *shape* the rest of the client needs: a one-way, memoized transition
//! from "raw bytes received off the wire" to "a parsed sequence the caller
//! can read", and the ability to hand the router a single parameter's bytes
//! for hashing without forcing a full parse.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use once_cell::sync::OnceCell;

/// One scalar value in a parameter list. This is a minimal type set — just
/// enough to round-trip through the canonical encoding below and to give
/// the router something to hash on for single-partition procedures.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f64),
    Varchar(String),
    Varbinary(Bytes),
}

impl ParamValue {
    /// Type tag used by the canonical encoding and by the router when it
    /// needs `(type, value-bytes)` for the hashinator.
    pub fn type_tag(&self) -> u8 {
        match self {
            ParamValue::Null => 0,
            ParamValue::TinyInt(_) => 1,
            ParamValue::SmallInt(_) => 2,
            ParamValue::Integer(_) => 3,
            ParamValue::BigInt(_) => 4,
            ParamValue::Float(_) => 5,
            ParamValue::Varchar(_) => 6,
            ParamValue::Varbinary(_) => 7,
        }
    }

    /// The bytes the hashinator consumes: value bytes only, no tag, no
    /// length prefix. Returns `None` for `Null` (never single-partition
    /// key material).
    pub fn hash_bytes(&self) -> Option<Bytes> {
        match self {
            ParamValue::Null => None,
            ParamValue::TinyInt(v) => Some(Bytes::copy_from_slice(&v.to_be_bytes())),
            ParamValue::SmallInt(v) => Some(Bytes::copy_from_slice(&v.to_be_bytes())),
            ParamValue::Integer(v) => Some(Bytes::copy_from_slice(&v.to_be_bytes())),
            ParamValue::BigInt(v) => Some(Bytes::copy_from_slice(&v.to_be_bytes())),
            ParamValue::Float(v) => Some(Bytes::copy_from_slice(&v.to_be_bytes())),
            ParamValue::Varchar(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            ParamValue::Varbinary(b) => Some(b.clone()),
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.type_tag());
        match self {
            ParamValue::Null => {},
            ParamValue::TinyInt(v) => out.put_i8(*v),
            ParamValue::SmallInt(v) => out.put_i16(*v),
            ParamValue::Integer(v) => out.put_i32(*v),
            ParamValue::BigInt(v) => out.put_i64(*v),
            ParamValue::Float(v) => out.put_f64(*v),
            ParamValue::Varchar(s) => {
                out.put_u32(s.len() as u32);
                out.put_slice(s.as_bytes());
            },
            ParamValue::Varbinary(b) => {
                out.put_u32(b.len() as u32);
                out.put_slice(b);
            },
        }
    }

    fn decode(buf: &mut Bytes) -> anyhow::Result<Self> {
        anyhow::ensure!(buf.has_remaining(), "truncated parameter: missing tag");
        let tag = buf.get_u8();
        Ok(match tag {
            0 => ParamValue::Null,
            1 => ParamValue::TinyInt(buf.get_i8()),
            2 => ParamValue::SmallInt(buf.get_i16()),
            3 => ParamValue::Integer(buf.get_i32()),
            4 => ParamValue::BigInt(buf.get_i64()),
            5 => ParamValue::Float(buf.get_f64()),
            6 => {
                let len = buf.get_u32() as usize;
                anyhow::ensure!(buf.remaining() >= len, "truncated varchar parameter");
                let s = String::from_utf8(buf.copy_to_bytes(len).to_vec())?;
                ParamValue::Varchar(s)
            },
            7 => {
                let len = buf.get_u32() as usize;
                anyhow::ensure!(buf.remaining() >= len, "truncated varbinary parameter");
                ParamValue::Varbinary(buf.copy_to_bytes(len))
            },
            other => anyhow::bail!("unknown parameter type tag {other}"),
        })
    }
}

/// Canonical encoding of a parameter list: `u16` count followed by each
/// value's tagged encoding, in order.
pub fn encode_params(values: &[ParamValue]) -> Bytes {
    let mut out = BytesMut::with_capacity(16 + values.len() * 8);
    out.put_u16(values.len() as u16);
    for v in values {
        v.encode(&mut out);
    }
    out.freeze()
}

fn decode_params(mut buf: Bytes) -> anyhow::Result<Vec<ParamValue>> {
    anyhow::ensure!(buf.remaining() >= 2, "invalid parameter set size");
    let count = buf.get_u16();
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(ParamValue::decode(&mut buf)?);
    }
    Ok(out)
}

/// The two representations an invocation's parameters can be in, exactly
/// one populated at a time per the invariant on `Invocation`.
#[derive(Debug, Clone)]
pub enum ParameterSet {
    /// Not yet serialized: the caller's own values.
    Deferred(Vec<ParamValue>),
    /// Already-serialized bytes, shared by cheap `Bytes` clone (a duplicated
    /// view, never a copy) so concurrent readers stay safe.
    Serialized(Bytes),
}

impl ParameterSet {
    pub fn empty() -> Self {
        ParameterSet::Deferred(Vec::new())
    }

    /// Byte count this parameter set will occupy on the wire, serializing
    /// on demand if needed. Per the codec contract, a non-empty serialized
    /// block shorter than 3 bytes is rejected.
    pub fn serialized_len(&self) -> anyhow::Result<usize> {
        let len = match self {
            ParameterSet::Deferred(values) => encode_params(values).len(),
            ParameterSet::Serialized(bytes) => bytes.len(),
        };
        if len != 0 {
            anyhow::ensure!(len >= 3, "invalid parameter set size: {len} bytes");
        }
        Ok(len)
    }

    /// Bytes to place on the wire, serializing lazily for the deferred
    /// case. Returns a cheap `Bytes` clone for the already-serialized case.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            ParameterSet::Deferred(values) => encode_params(values),
            ParameterSet::Serialized(bytes) => bytes.clone(),
        }
    }
}

/// Lazily-parsed parameter block on the decode side: holds the raw slice
/// taken from the inbound buffer and memoizes the parsed sequence the first
/// time a caller asks for it. The raw → parsed transition is one-way, as
/// required by the deferred-parameter-parsing design note.
#[derive(Debug, Clone)]
pub struct LazyParams {
    raw: Bytes,
    parsed: OnceCell<Vec<ParamValue>>,
}

impl LazyParams {
    pub fn new(raw: Bytes) -> Self {
        Self {
            raw,
            parsed: OnceCell::new(),
        }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Parses on first call and caches the result; subsequent calls are
    /// free. A parse failure is not memoized so a caller may retry after
    /// fixing up `raw` externally (not expected in practice, but keeps the
    /// latch honest).
    pub fn get(&self) -> anyhow::Result<&[ParamValue]> {
        if let Some(v) = self.parsed.get() {
            return Ok(v);
        }
        let v = decode_params(self.raw.clone())?;
        Ok(self.parsed.get_or_init(|| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_values() {
        let values = vec![
            ParamValue::Integer(42),
            ParamValue::Varchar("hello".to_string()),
            ParamValue::Null,
            ParamValue::Varbinary(Bytes::from_static(b"\x01\x02")),
        ];
        let encoded = encode_params(&values);
        let decoded = decode_params(encoded).unwrap();
        assert_eq!(values, decoded);
    }

    #[test]
    fn lazy_params_memoizes() {
        let raw = encode_params(&[ParamValue::BigInt(7)]);
        let lazy = LazyParams::new(raw);
        let first = lazy.get().unwrap().to_vec();
        let second = lazy.get().unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(first, vec![ParamValue::BigInt(7)]);
    }

    #[test]
    fn hash_bytes_null_is_none() {
        assert!(ParamValue::Null.hash_bytes().is_none());
        assert_eq!(
            ParamValue::Integer(5).hash_bytes().unwrap().as_ref(),
            &5i32.to_be_bytes()
        );
    }
}
