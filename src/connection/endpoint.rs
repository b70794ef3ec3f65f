// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One connection endpoint per server node: owns the TCP stream, runs the
//! inbound read callback, and exposes `enqueue` / `write_to_network` / the
//! network-backpressure signal to the send pipeline.
//!
//! The endpoint is never the initiator of business logic; it is a passive
//! resource plus the queue the per-connection worker drains.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use bytes::{Buf, Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    connection::{
        backpressure::NetworkBackpressure, common::io_with_timeout, stats::ConnectionStats,
    },
    dispatch::pool::DispatchJob,
    pipeline::queue::PriorityQueue,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub struct ConnectionEndpoint {
    pub id: u64,
    pub addr: SocketAddr,
    pub host_id: Mutex<Option<String>>,
    writer: Mutex<OwnedWriteHalf>,
    pub queue: PriorityQueue,
    pub backpressure: NetworkBackpressure,
    pub stats: ConnectionStats,
    pub connected: AtomicBool,
    /// Queue length at and above which `backpressure` turns on; below which
    /// it turns back off. A proxy for "the I/O layer's write buffer is
    /// full": this endpoint has no visibility into the kernel socket
    /// buffer, so the outbound queue depth it already tracks stands in for
    /// it (`LimitsConfig::network_backpressure_level`).
    network_backpressure_level: usize,
    /// Whether this connection's `addr` is known to be the cluster's admin
    /// port rather than its client port. `None` when the caller that
    /// opened it (a user-supplied bootstrap address, or first-connection
    /// recovery reusing a historical address) has no such knowledge; only
    /// the topology manager's connection task, which picks the port
    /// itself from `@SystemInformation`, can set this to `Some`.
    pub is_admin_port: Option<bool>,
    cancel: CancellationToken,
}

impl ConnectionEndpoint {
    /// Connects to `addr`, spawns the inbound read loop, and returns the
    /// endpoint. Decoded frames are handed to `dispatch_tx`; `on_disconnect`
    /// is invoked exactly once, from the read loop, when the socket stops.
    pub async fn connect(
        addr: SocketAddr,
        setup_timeout: std::time::Duration,
        dispatch_tx: mpsc::Sender<DispatchJob>,
        on_disconnect: Arc<dyn Fn(u64) + Send + Sync>,
        network_backpressure_level: usize,
        is_admin_port: Option<bool>,
    ) -> anyhow::Result<Arc<Self>> {
        let cancel = CancellationToken::new();
        let stream = io_with_timeout(
            "connect",
            TcpStream::connect(addr),
            setup_timeout,
            &cancel,
        )
        .await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let endpoint = Arc::new(Self {
            id,
            addr,
            host_id: Mutex::new(None),
            writer: Mutex::new(write_half),
            queue: PriorityQueue::new(),
            backpressure: NetworkBackpressure::new(),
            stats: ConnectionStats::new(),
            connected: AtomicBool::new(true),
            network_backpressure_level,
            is_admin_port,
            cancel,
        });

        tokio::spawn(Self::read_loop(
            endpoint.clone(),
            read_half,
            dispatch_tx,
            on_disconnect,
        ));

        Ok(endpoint)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Pushes `call` onto this connection's send queue and re-evaluates
    /// network backpressure. Every admission path must enqueue through here
    /// rather than `self.queue.push` directly, or the outbound queue can
    /// grow past `network_backpressure_level` without the signal ever
    /// turning on.
    pub fn enqueue(&self, call: crate::pipeline::queue::QueuedCall) {
        self.queue.push(call);
        self.update_backpressure();
    }

    /// Re-evaluates the backpressure flag against the current queue depth.
    /// Called after both enqueue (depth grows) and dequeue (depth shrinks)
    /// so the signal tracks the queue in both directions.
    pub fn update_backpressure(&self) {
        if self.queue.len() >= self.network_backpressure_level {
            self.backpressure.set_on();
        } else {
            self.backpressure.set_off();
        }
    }

    /// Hands already-framed bytes (4-byte length prefix included) to the
    /// socket.
    pub async fn write_to_network(&self, framed: &Bytes) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(framed).await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    async fn read_loop(
        endpoint: Arc<Self>,
        mut reader: OwnedReadHalf,
        dispatch_tx: mpsc::Sender<DispatchJob>,
        on_disconnect: Arc<dyn Fn(u64) + Send + Sync>,
    ) {
        let mut len_buf = [0u8; 4];
        loop {
            if endpoint.cancel.is_cancelled() {
                break;
            }
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {},
                Err(e) => {
                    debug!(connection_id = endpoint.id, error = %e, "connection read loop ending");
                    break;
                },
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut body = BytesMut::zeroed(len);
            if let Err(e) = reader.read_exact(&mut body).await {
                warn!(connection_id = endpoint.id, error = %e, "truncated frame, tearing down connection");
                break;
            }

            let job = DispatchJob {
                connection_id: endpoint.id,
                frame: body.freeze(),
                arrived_at: std::time::Instant::now(),
            };
            if dispatch_tx.send(job).await.is_err() {
                break;
            }
        }

        endpoint.connected.store(false, Ordering::Release);
        endpoint.backpressure.set_off();
        for leftover in endpoint.queue.drain() {
            // Leftover queued calls are failed by the connection-teardown
            // path in the caller of `on_disconnect` (it scans the registry
            // for this connection id); dropping them here just frees the
            // queue.
            drop(leftover);
        }
        on_disconnect(endpoint.id);
    }
}

/// Strips the 4-byte length prefix from a framed buffer, returning the
/// remaining body view. Used by tests and by anything reading frames off a
/// buffer that already has the prefix attached (the read loop above reads
/// the prefix directly off the socket instead).
pub fn strip_length_prefix(mut framed: Bytes) -> anyhow::Result<Bytes> {
    anyhow::ensure!(framed.remaining() >= 4, "frame shorter than length prefix");
    let len = framed.get_u32() as usize;
    anyhow::ensure!(framed.remaining() >= len, "frame shorter than declared length");
    Ok(framed)
}
