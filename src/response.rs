// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The decoded shape of a server reply. The response payload itself (the
//! result-set encoding) is as opaque to this core as the parameter set is
//! on the way in; only the envelope fields the dispatcher and registry act
//! on are modeled here.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// SUCCESS per the server's status byte; every other value is some flavor
/// of failure and is surfaced through [`crate::error::ClientError::ProcedureCallError`]
/// on the sync surface.
pub const STATUS_SUCCESS: i8 = 1;

#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub handle: i64,
    pub status: i8,
    pub status_string: String,
    /// Opaque result-set bytes; this core makes no attempt to decode them.
    pub results: Bytes,
    pub round_trip: Duration,
}

impl ClientResponse {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Per-procedure counters the connection endpoint keeps, keyed by
/// procedure name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcedureStats {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub aborts: u64,
}

impl ProcedureStats {
    pub fn record(&mut self, status: i8) {
        self.invocations += 1;
        match status {
            STATUS_SUCCESS => self.successes += 1,
            // Negative statuses below this value are modeled as aborts
            // (the application may retry); anything else is a hard
            // failure. The exact status taxonomy is a server contract this
            // core does not reproduce in full.
            s if s < 0 => self.aborts += 1,
            _ => self.failures += 1,
        }
    }
}

/// Minimal on-wire envelope for a reply frame: `[1-byte status][4-byte
/// status-string length][status string][8-byte handle][opaque result
/// bytes]`. The result-set encoding itself is as out of scope here as it
/// is for the invocation's parameter set; this envelope only carries what
/// the dispatcher needs to route and classify a response.
pub fn encode_response_body(handle: i64, status: i8, status_string: &str, results: &Bytes) -> Bytes {
    let mut out = BytesMut::with_capacity(1 + 4 + status_string.len() + 8 + results.len());
    out.put_i8(status);
    out.put_u32(status_string.len() as u32);
    out.put_slice(status_string.as_bytes());
    out.put_i64(handle);
    out.put_slice(results);
    out.freeze()
}

pub fn decode_response_body(mut buf: Bytes) -> anyhow::Result<(i64, i8, String, Bytes)> {
    anyhow::ensure!(buf.remaining() >= 1, "truncated response: status");
    let status = buf.get_i8();
    anyhow::ensure!(buf.remaining() >= 4, "truncated response: status string length");
    let len = buf.get_u32() as usize;
    anyhow::ensure!(buf.remaining() >= len, "truncated response: status string");
    let status_string = String::from_utf8(buf.copy_to_bytes(len).to_vec())?;
    anyhow::ensure!(buf.remaining() >= 8, "truncated response: handle");
    let handle = buf.get_i64();
    Ok((handle, status, status_string, buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_envelope_round_trips() {
        let results = Bytes::from_static(b"\x00\x01\x02");
        let body = encode_response_body(7, STATUS_SUCCESS, "OK", &results);
        let (handle, status, status_string, decoded_results) =
            decode_response_body(body).unwrap();
        assert_eq!(handle, 7);
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(status_string, "OK");
        assert_eq!(decoded_results, results);
    }
}
