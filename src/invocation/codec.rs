// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Invocation wire codec: a length-prefixed, versioned invocation record.
//! Only version 2 is produced by this client; versions 0 and 1 are decoded
//! for completeness but never written.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::invocation::params::{LazyParams, ParameterSet};

/// Handles above this value are reserved for the two magic async-update
/// sentinels; negative handles are internal system calls.
pub const MAX_CLIENT_HANDLE: i64 = i64::MAX - 3;
/// Unsolicited topology-refresh push.
pub const ASYNC_TOPO_HANDLE: i64 = MAX_CLIENT_HANDLE + 1;
/// Unsolicited procedure-catalog push.
pub const ASYNC_CATALOG_HANDLE: i64 = MAX_CLIENT_HANDLE + 2;

/// Sentinel meaning "route by parameter" rather than an explicit partition.
pub const ROUTE_BY_PARAMETER: i32 = -1;
/// Sentinel the router uses for a multi-partition (or affinity-unknown)
/// call.
pub const MULTI_PARTITION_ID: i32 = -2;

/// Sentinel meaning "no batch-timeout override".
pub const NO_BATCH_TIMEOUT: i32 = i32::MIN;

const VERSION_CURRENT: u8 = 2;
const EXT_BATCH_TIMEOUT: u8 = 1;

/// Clamp an out-of-range priority to the lowest priority (8), matching the
/// tolerant behavior described for invocation priorities.
pub fn clamp_priority(p: u8) -> u8 {
    if (1..=8).contains(&p) { p } else { 8 }
}

/// An immutable descriptor of one call. See the data-model invariant: at
/// any time, exactly one of `Deferred`/`Serialized` is populated in
/// `params`.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub procedure_name: String,
    pub handle: i64,
    pub partition_id: i32,
    pub priority: u8,
    pub batch_timeout_ms: i32,
    pub params: ParameterSet,
}

impl Invocation {
    pub fn new(procedure_name: impl Into<String>, handle: i64) -> Self {
        Self {
            procedure_name: procedure_name.into(),
            handle,
            partition_id: ROUTE_BY_PARAMETER,
            priority: clamp_priority(1),
            batch_timeout_ms: NO_BATCH_TIMEOUT,
            params: ParameterSet::empty(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    pub fn with_partition(mut self, partition_id: i32) -> Self {
        self.partition_id = partition_id;
        self
    }

    pub fn with_params(mut self, params: ParameterSet) -> Self {
        self.params = params;
        self
    }

    /// Exact byte count `write_to` will produce for the body (not including
    /// the outer 4-byte length prefix).
    pub fn serialized_size(&self) -> anyhow::Result<usize> {
        let name_len = self.procedure_name.len();
        let header = 1 + 4 + name_len + 8 + 1;
        // One extension is a 1-byte tag plus its 4-byte millisecond value;
        // the extension-count byte itself is already counted in `header`.
        let ext_len = if self.batch_timeout_ms != NO_BATCH_TIMEOUT {
            5
        } else {
            0
        };
        let params_len = self.params.serialized_len()?;
        Ok(header + ext_len + params_len)
    }

    /// Writes exactly `serialized_size()` bytes of body (version, name,
    /// handle, extensions, parameter bytes) — the caller is responsible for
    /// the 4-byte length prefix.
    pub fn write_to(&self, out: &mut BytesMut) -> anyhow::Result<()> {
        let size = self.serialized_size()?;
        out.reserve(size);

        out.put_u8(VERSION_CURRENT);
        out.put_i32(self.procedure_name.len() as i32);
        out.put_slice(self.procedure_name.as_bytes());
        out.put_i64(self.handle);

        if self.batch_timeout_ms != NO_BATCH_TIMEOUT {
            out.put_u8(1);
            out.put_u8(EXT_BATCH_TIMEOUT);
            out.put_i32(self.batch_timeout_ms);
        } else {
            out.put_u8(0);
        }

        // Parameter bytes are a duplicated view when already serialized, so
        // concurrent readers of the same `Invocation` stay safe.
        out.put_slice(&self.params.to_bytes());
        Ok(())
    }

    /// Writes the full length-prefixed frame (4-byte big-endian length
    /// followed by the body).
    pub fn write_framed(&self) -> anyhow::Result<Bytes> {
        let size = self.serialized_size()?;
        let mut out = BytesMut::with_capacity(4 + size);
        out.put_u32(size as u32);
        self.write_to(&mut out)?;
        Ok(out.freeze())
    }
}

/// A decoded invocation with lazily-parsed parameters (used on the decode
/// path — e.g. in tests and tools that read back what was written).
#[derive(Debug, Clone)]
pub struct DecodedInvocation {
    pub procedure_name: String,
    pub handle: i64,
    pub batch_timeout_ms: i32,
    pub params: LazyParams,
}

/// Peeks the version byte and dispatches to the version-specific decoder.
/// `buf` must contain exactly one body (the length prefix already having
/// been stripped and used to bound the slice).
pub fn read_from(mut buf: Bytes) -> anyhow::Result<DecodedInvocation> {
    anyhow::ensure!(buf.has_remaining(), "empty invocation body");
    let version = buf.get_u8();
    match version {
        0 => read_v0(buf),
        1 => read_v1(buf),
        2 => read_v2(buf),
        other => anyhow::bail!("unsupported invocation version {other}"),
    }
}

fn read_name_and_handle(buf: &mut Bytes) -> anyhow::Result<(String, i64)> {
    anyhow::ensure!(buf.remaining() >= 4, "truncated invocation: name length");
    let name_len = buf.get_i32();
    anyhow::ensure!(name_len >= 0, "null procedure name not expected here");
    let name_len = name_len as usize;
    anyhow::ensure!(buf.remaining() >= name_len, "truncated invocation: name bytes");
    let name = String::from_utf8(buf.copy_to_bytes(name_len).to_vec())?;
    anyhow::ensure!(buf.remaining() >= 8, "truncated invocation: handle");
    let handle = buf.get_i64();
    Ok((name, handle))
}

/// Version 0 has no extensions at all.
fn read_v0(mut buf: Bytes) -> anyhow::Result<DecodedInvocation> {
    let (procedure_name, handle) = read_name_and_handle(&mut buf)?;
    Ok(DecodedInvocation {
        procedure_name,
        handle,
        batch_timeout_ms: NO_BATCH_TIMEOUT,
        params: LazyParams::new(buf),
    })
}

/// Version 1 has a single preceding byte indicating whether a batch-timeout
/// int follows.
///
/// NOTE: as written this always calls the generic extension skipper after
/// conditionally reading the batch-timeout field, even though a version-1
/// stream carries no further extensions to skip. This mirrors a
/// `switch`/fallthrough in the source decoder this client was ported from
/// and is preserved rather than "fixed" — see the open question on
/// version-1 decoding in the design notes. It is a no-op here because the
/// skipper sees zero remaining extensions, but a byte-for-byte-faithful
/// implementation keeps the call in case a future encoder turns out to
/// populate it.
fn read_v1(mut buf: Bytes) -> anyhow::Result<DecodedInvocation> {
    let (procedure_name, handle) = read_name_and_handle(&mut buf)?;

    anyhow::ensure!(buf.has_remaining(), "truncated invocation: v1 timeout flag");
    let has_timeout = buf.get_u8() != 0;
    let batch_timeout_ms = if has_timeout {
        anyhow::ensure!(buf.remaining() >= 4, "truncated invocation: v1 timeout value");
        buf.get_i32()
    } else {
        NO_BATCH_TIMEOUT
    };

    skip_unknown_extensions(&mut buf, 0)?;

    Ok(DecodedInvocation {
        procedure_name,
        handle,
        batch_timeout_ms,
        params: LazyParams::new(buf),
    })
}

fn read_v2(mut buf: Bytes) -> anyhow::Result<DecodedInvocation> {
    let (procedure_name, handle) = read_name_and_handle(&mut buf)?;

    anyhow::ensure!(buf.has_remaining(), "truncated invocation: extension count");
    let ext_count = buf.get_u8();

    let mut batch_timeout_ms = NO_BATCH_TIMEOUT;
    for _ in 0..ext_count {
        anyhow::ensure!(buf.has_remaining(), "truncated invocation: extension tag");
        let tag = buf.get_u8();
        match tag {
            EXT_BATCH_TIMEOUT => {
                anyhow::ensure!(
                    buf.remaining() >= 4,
                    "truncated invocation: batch timeout extension"
                );
                batch_timeout_ms = buf.get_i32();
            },
            _unknown => skip_one_unknown_extension(&mut buf)?,
        }
    }

    Ok(DecodedInvocation {
        procedure_name,
        handle,
        batch_timeout_ms,
        params: LazyParams::new(buf),
    })
}

/// Skips `remaining` unknown extensions, each a 1-byte tag followed by a
/// type-specific body. Since this core only defines the batch-timeout
/// extension, any tag reaching here is by definition unknown.
fn skip_unknown_extensions(buf: &mut Bytes, remaining: u8) -> anyhow::Result<()> {
    for _ in 0..remaining {
        skip_one_unknown_extension(buf)?;
    }
    Ok(())
}

/// A length-aware skip for an extension whose body shape this core does not
/// know: treats the body as a 4-byte length-prefixed blob, matching the
/// batch-timeout extension's own body size as the baseline "small fixed
/// body" shape used elsewhere on this wire.
fn skip_one_unknown_extension(buf: &mut Bytes) -> anyhow::Result<()> {
    anyhow::ensure!(buf.remaining() >= 4, "truncated invocation: unknown extension body");
    let len = buf.get_u32() as usize;
    anyhow::ensure!(buf.remaining() >= len, "truncated invocation: unknown extension data");
    buf.advance(len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::params::ParamValue;

    #[test]
    fn round_trips_v2_with_batch_timeout_and_params() {
        let inv = Invocation::new("ArbitraryDurationProc", 42)
            .with_params(ParameterSet::Deferred(vec![ParamValue::Integer(100)]));
        let mut inv = inv;
        inv.batch_timeout_ms = 5000;

        let framed = inv.write_framed().unwrap();
        let mut framed = framed;
        let len = framed.get_u32() as usize;
        assert_eq!(len, framed.remaining());

        let decoded = read_from(framed).unwrap();
        assert_eq!(decoded.procedure_name, "ArbitraryDurationProc");
        assert_eq!(decoded.handle, 42);
        assert_eq!(decoded.batch_timeout_ms, 5000);
        assert_eq!(
            decoded.params.get().unwrap(),
            &[ParamValue::Integer(100)]
        );
    }

    #[test]
    fn round_trips_v2_without_batch_timeout() {
        let inv = Invocation::new("@Ping", -1);
        let framed = inv.write_framed().unwrap();
        let mut framed = framed;
        let _len = framed.get_u32();
        let decoded = read_from(framed).unwrap();
        assert_eq!(decoded.batch_timeout_ms, NO_BATCH_TIMEOUT);
        assert!(decoded.params.get().unwrap().is_empty());
    }

    #[test]
    fn decodes_v0_with_no_extensions() {
        let mut body = BytesMut::new();
        body.put_u8(0);
        body.put_i32(4);
        body.put_slice(b"Ping");
        body.put_i64(-1);
        body.put_u16(0); // empty canonical param list

        let decoded = read_from(body.freeze()).unwrap();
        assert_eq!(decoded.procedure_name, "Ping");
        assert_eq!(decoded.batch_timeout_ms, NO_BATCH_TIMEOUT);
    }

    #[test]
    fn priority_out_of_range_clamps_to_lowest() {
        assert_eq!(clamp_priority(0), 8);
        assert_eq!(clamp_priority(9), 8);
        assert_eq!(clamp_priority(3), 3);
    }

    #[test]
    fn empty_non_null_param_block_under_three_bytes_is_rejected() {
        let inv = Invocation::new("Foo", 1).with_params(ParameterSet::Serialized(
            Bytes::from_static(b"\x01\x02"),
        ));
        assert!(inv.serialized_size().is_err());
    }
}
