// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S2: response timeout — a call whose server-side delay exceeds the
//! configured timeout completes with a response-timeout error rather than
//! hanging forever.

use std::time::{Duration, Instant};

use oltp_client_rs::error::ClientError;

use crate::integration_tests::common::{ARBITRARY_DURATION_PROC, arbitrary_duration_params, connected_client, spawn_mock_server};

#[tokio::test]
async fn slow_response_times_out() {
    let addr = spawn_mock_server().await.unwrap();
    let timeout = Duration::from_millis(150);
    let client = connected_client(addr, |cfg| {
        cfg.timeouts.procedure_call_timeout = timeout;
    })
    .await
    .unwrap();

    let start = Instant::now();
    let result = client
        .call_async(ARBITRARY_DURATION_PROC, arbitrary_duration_params(500), None, None, None)
        .await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(ClientError::ResponseTimeout(_))));
    assert!(elapsed >= timeout, "completed before the configured timeout: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "waited for the late response instead of timing out: {elapsed:?}");
}
