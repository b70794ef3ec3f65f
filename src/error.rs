// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error kinds surfaced to application code.
//!
//! Everything below the public surface (config loading, topology
//! bookkeeping, catalog parsing) uses [`anyhow::Result`]; only failures that
//! complete an application-visible call are wrapped in [`ClientError`].

use thiserror::Error;

/// Errors an application can observe from a completed call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Admission was rejected because the registry was at or above its hard
    /// cap.
    #[error("request limit exceeded: {outstanding} outstanding, hard limit {hard_limit}")]
    RequestLimitExceeded {
        outstanding: usize,
        hard_limit: usize,
    },

    /// The invocation could not be serialized, or no connection was
    /// available to send it on.
    #[error("not sent: {0}")]
    NotSent(String),

    /// The budget expired while waiting for a send permit or network
    /// clearance; the invocation was never handed to the socket.
    #[error("request timeout after {0:?}")]
    RequestTimeout(std::time::Duration),

    /// The budget expired after the invocation was sent.
    #[error("response timeout after {0:?}")]
    ResponseTimeout(std::time::Duration),

    /// The bound connection dropped while the call was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// The server replied with a non-SUCCESS status.
    #[error("procedure call error: status {status}, {message}")]
    ProcedureCallError { status: i8, message: String },
}

impl ClientError {
    pub fn not_sent(msg: impl Into<String>) -> Self {
        ClientError::NotSent(msg.into())
    }
}
