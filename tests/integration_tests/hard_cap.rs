// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S6: hard cap — once the registry is at its hard limit, the next
//! admission fails immediately with a request-limit error rather than
//! queuing.

use oltp_client_rs::error::ClientError;

use crate::integration_tests::common::{ARBITRARY_DURATION_PROC, arbitrary_duration_params, connected_client, spawn_mock_server};

#[tokio::test]
async fn eleventh_call_over_hard_limit_fails_immediately() {
    let addr = spawn_mock_server().await.unwrap();
    let client = connected_client(addr, |cfg| {
        cfg.limits.request_hard_limit = 10;
        cfg.limits.request_warning_level = 10;
        cfg.limits.request_resume_level = 5;
    })
    .await
    .unwrap();

    // Ten calls held outstanding by the mock server's delay, keeping the
    // registry at its hard limit while the eleventh is admitted.
    let held: Vec<_> = (0..10)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call_async(ARBITRARY_DURATION_PROC, arbitrary_duration_params(300), None, None, None)
                    .await
            })
        })
        .collect();

    // Give the sends a moment to land so the registry is actually full
    // before the eleventh call is admitted.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let eleventh = client
        .call_async(ARBITRARY_DURATION_PROC, arbitrary_duration_params(0), None, None, None)
        .await;
    assert!(
        matches!(eleventh, Err(ClientError::RequestLimitExceeded { .. })),
        "unexpected outcome: {eleventh:?}"
    );

    for handle in held {
        let outcome = handle.await.expect("task should not panic");
        assert!(outcome.expect("held call should still succeed").is_success());
    }
}
