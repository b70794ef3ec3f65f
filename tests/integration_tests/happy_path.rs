// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S1: happy path — a call that completes well within its timeout returns
//! SUCCESS.

use std::time::{Duration, Instant};

use crate::integration_tests::common::{ARBITRARY_DURATION_PROC, arbitrary_duration_params, connected_client, spawn_mock_server};

#[tokio::test]
async fn arbitrary_duration_proc_zero_completes_success_within_timeout() {
    let addr = spawn_mock_server().await.unwrap();
    let client = connected_client(addr, |cfg| {
        cfg.timeouts.procedure_call_timeout = Duration::from_millis(1200);
    })
    .await
    .unwrap();

    let start = Instant::now();
    let response = client
        .call_async(ARBITRARY_DURATION_PROC, arbitrary_duration_params(0), None, None, None)
        .await
        .expect("call should succeed");
    let elapsed = start.elapsed();

    assert!(response.is_success());
    assert!(elapsed <= Duration::from_millis(1200), "round trip took {elapsed:?}");
}
