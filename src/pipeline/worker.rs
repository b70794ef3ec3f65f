// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The per-connection send worker: the hottest loop in the client. One
//! task per connection, spawned alongside the connection itself,
//! pulling from its priority queue and driving each call through rate
//! limiting, permit acquisition, network-backpressure clearance, and the
//! final write.

use std::{sync::Arc, time::Instant};

use tracing::{debug, warn};

use crate::{
    connection::ConnectionEndpoint,
    error::ClientError,
    pipeline::{queue::QueuedCall, rate_limiter::RateLimiter},
    procedures::is_exempt_long_op,
    registry::{Registry, SendPermits},
};

/// Runs until the connection disconnects. Intended to be spawned once per
/// connection right after [`ConnectionEndpoint::connect`].
pub async fn run(
    endpoint: Arc<ConnectionEndpoint>,
    registry: Arc<Registry>,
    permits: Arc<SendPermits>,
    rate_limiter: Option<Arc<RateLimiter>>,
) {
    while endpoint.is_connected() {
        let call = endpoint.queue.pop().await;
        endpoint.update_backpressure();
        step(&endpoint, &registry, &permits, rate_limiter.as_deref(), call).await;
    }

    // Teardown: anything still queued is failed via the connection-lost
    // path by whoever observes `fail_connection` for this id (the
    // disconnect callback), not here — the worker's job ends at "no longer
    // connected".
}

async fn step(
    endpoint: &Arc<ConnectionEndpoint>,
    registry: &Arc<Registry>,
    permits: &Arc<SendPermits>,
    rate_limiter: Option<&RateLimiter>,
    call: QueuedCall,
) {
    let QueuedCall {
        handle,
        invocation,
        admitted_at,
        timeout,
        ..
    } = call;

    let remaining = |now: Instant| timeout.saturating_sub(now.saturating_duration_since(admitted_at));

    if let Some(limiter) = rate_limiter {
        limiter.wait_for_slot().await;
    }

    let framed = match invocation.write_framed() {
        Ok(bytes) => bytes,
        Err(e) => {
            fail(registry, handle, ClientError::not_sent(e.to_string()));
            return;
        },
    };

    let budget = remaining(Instant::now());
    if budget.is_zero() {
        fail(registry, handle, ClientError::RequestTimeout(timeout));
        return;
    }

    let permit = match permits.try_acquire_owned() {
        Ok(p) => p,
        Err(_) => match tokio::time::timeout(budget, permits.acquire_owned()).await {
            Ok(Ok(p)) => p,
            Ok(Err(_)) => {
                fail(registry, handle, ClientError::ConnectionLost);
                return;
            },
            Err(_) => {
                fail(registry, handle, ClientError::RequestTimeout(timeout));
                return;
            },
        },
    };

    let budget = remaining(Instant::now());
    if budget.is_zero() {
        fail(registry, handle, ClientError::RequestTimeout(timeout));
        return;
    }
    if endpoint.backpressure.is_on()
        && tokio::time::timeout(budget, endpoint.backpressure.wait_clear())
            .await
            .is_err()
    {
        fail(registry, handle, ClientError::RequestTimeout(timeout));
        return;
    }

    registry.mark_active(handle);
    registry.attach_permit(handle, permit);

    // Re-check remaining budget: it could have expired while waiting for
    // permits or network clearance. Exempt long-op procedures rely on the
    // per-tick scheduler's long-op floor instead of a sub-second one-shot.
    let budget = remaining(Instant::now());
    if budget < std::time::Duration::from_secs(1) && !is_exempt_long_op(&invocation.procedure_name) {
        schedule_one_shot_timeout(registry.clone(), handle, budget);
    }

    if let Err(e) = endpoint.write_to_network(&framed).await {
        debug!(handle, error = %e, "write failed, connection considered lost");
        fail(registry, handle, ClientError::ConnectionLost);
    }
}

fn schedule_one_shot_timeout(registry: Arc<Registry>, handle: i64, delay: std::time::Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(record) = registry.remove(handle) {
            let _ = record.completion.send(Err(ClientError::ResponseTimeout(delay)));
        }
    });
}

fn fail(registry: &Registry, handle: i64, err: ClientError) {
    if let Some(record) = registry.remove(handle) {
        if record.completion.send(Err(err)).is_err() {
            warn!(handle, "completion receiver dropped before local failure delivered");
        }
    }
}
