// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S3: a timeout under one second still fires promptly via the one-shot
//! scheduled task rather than waiting for the next per-second tick.

use std::time::{Duration, Instant};

use oltp_client_rs::error::ClientError;

use crate::integration_tests::common::{ARBITRARY_DURATION_PROC, arbitrary_duration_params, connected_client, spawn_mock_server};

#[tokio::test]
async fn microsecond_timeout_completes_within_milliseconds() {
    let addr = spawn_mock_server().await.unwrap();
    let client = connected_client(addr, |_| {}).await.unwrap();

    let start = Instant::now();
    let result = client
        .call_async(
            ARBITRARY_DURATION_PROC,
            arbitrary_duration_params(2500),
            None,
            None,
            Some(Duration::from_micros(123)),
        )
        .await;
    let elapsed = start.elapsed();

    assert!(
        matches!(result, Err(ClientError::RequestTimeout(_)) | Err(ClientError::ResponseTimeout(_))),
        "unexpected outcome: {result:?}"
    );
    assert!(elapsed <= Duration::from_millis(50), "took too long to time out: {elapsed:?}");
}
