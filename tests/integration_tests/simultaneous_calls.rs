// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S4: 20 concurrent calls, each well within their timeout budget, all
//! complete successfully.

use std::time::Duration;

use crate::integration_tests::common::{ARBITRARY_DURATION_PROC, arbitrary_duration_params, connected_client, spawn_mock_server};

#[tokio::test]
async fn twenty_concurrent_calls_all_succeed() {
    let addr = spawn_mock_server().await.unwrap();
    let client = connected_client(addr, |cfg| {
        cfg.timeouts.procedure_call_timeout = Duration::from_millis(1200);
    })
    .await
    .unwrap();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call_async(ARBITRARY_DURATION_PROC, arbitrary_duration_params(100), None, None, None)
                    .await
            })
        })
        .collect();

    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.expect("task should not panic"));
        }
        outcomes
    });

    let outcomes = deadline.await.expect("all calls should finish within 5s");
    for outcome in outcomes {
        assert!(outcome.expect("call should succeed").is_success());
    }
}
