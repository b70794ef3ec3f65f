// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A minimal in-process stand-in for a cluster node, speaking exactly the
//! wire envelope this crate's own codec and `response.rs` produce. A real
//! server is out of scope for this crate; these tests own both ends of the
//! socket so the send pipeline/registry/router/dispatcher stack can be
//! exercised end to end without a real cluster.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use oltp_client_rs::{
    cfg::config::ClientConfig,
    invocation::{ParamValue, read_from},
    response::{STATUS_SUCCESS, encode_response_body},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// `ArbitraryDurationProc(millis)`: the mock server sleeps for `millis`
/// milliseconds (read out of the invocation's first parameter, defaulting
/// to zero) before replying SUCCESS.
pub const ARBITRARY_DURATION_PROC: &str = "ArbitraryDurationProc";

/// Starts a mock server that answers every invocation it receives. Returns
/// the address to connect to; the server task runs until the process exits
/// (tests are short-lived, so it is never explicitly stopped).
pub async fn spawn_mock_server() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(serve_connection(stream));
        }
    });
    Ok(addr)
}

async fn serve_connection(mut stream: TcpStream) {
    stream.set_nodelay(true).ok();
    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }

        let Ok(decoded) = read_from(body.into()) else {
            return;
        };

        let delay_ms = decoded
            .params
            .get()
            .ok()
            .and_then(|params| params.first())
            .and_then(|p| match p {
                ParamValue::Integer(v) => Some(*v as u64),
                ParamValue::BigInt(v) => Some(*v as u64),
                _ => None,
            })
            .unwrap_or(0);

        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let response = encode_response_body(decoded.handle, STATUS_SUCCESS, "OK", &Bytes::new());
        let mut framed = Vec::with_capacity(4 + response.len());
        framed.extend_from_slice(&(response.len() as u32).to_be_bytes());
        framed.extend_from_slice(&response);
        if stream.write_all(&framed).await.is_err() {
            return;
        }
    }
}

/// A config pointed at one mock server, with background connection
/// management disabled (the mock doesn't answer `@Subscribe` et al) and
/// limits overridden per-test.
pub fn base_config(addr: SocketAddr) -> ClientConfig {
    let mut cfg = ClientConfig::builder([addr.to_string()]);
    cfg.disable_connection_mgmt = true;
    cfg
}

pub fn arbitrary_duration_params(millis: i32) -> oltp_client_rs::invocation::ParameterSet {
    oltp_client_rs::invocation::ParameterSet::Deferred(vec![ParamValue::Integer(millis)])
}

pub async fn connected_client(addr: SocketAddr, configure: impl FnOnce(&mut ClientConfig)) -> Result<Arc<oltp_client_rs::client::Client>> {
    let mut cfg = base_config(addr);
    configure(&mut cfg);
    let client = oltp_client_rs::client::Client::connect(cfg).await?;
    Ok(Arc::new(client))
}
