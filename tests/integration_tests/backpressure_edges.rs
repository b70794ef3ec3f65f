// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Backpressure edges — with warning=15/resume=5, 20 concurrent
//! longer-running calls should cross the warning threshold exactly once
//! (backpressure on) and, once enough of them drain, cross the resume
//! threshold exactly once (backpressure off). The observed sequence never
//! repeats a state consecutively.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::integration_tests::common::{ARBITRARY_DURATION_PROC, arbitrary_duration_params, base_config, spawn_mock_server};

#[tokio::test]
async fn backpressure_transitions_alternate_and_bracket_the_thresholds() {
    let addr = spawn_mock_server().await.unwrap();

    let mut cfg = base_config(addr);
    cfg.limits.request_hard_limit = 1000;
    cfg.limits.request_warning_level = 15;
    cfg.limits.request_resume_level = 5;
    cfg.limits.outstanding_txn_limit = 100;

    let observed: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_for_handler = observed.clone();

    let client = Arc::new(
        oltp_client_rs::client::ClientBuilder::new()
            .on_backpressure(Arc::new(move |state| {
                observed_for_handler.lock().unwrap().push(state);
            }))
            .connect(cfg)
            .await
            .unwrap(),
    );

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call_async(ARBITRARY_DURATION_PROC, arbitrary_duration_params(250), None, None, None)
                    .await
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.await.expect("task should not panic");
    }

    // Give the last backpressure-off notification (spawned off the
    // completion path) a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = observed.lock().unwrap().clone();
    assert!(!seen.is_empty(), "expected at least one backpressure transition");
    assert_eq!(seen.first(), Some(&true), "first transition should be backpressure-on");

    for pair in seen.windows(2) {
        assert_ne!(pair[0], pair[1], "backpressure state repeated consecutively: {seen:?}");
    }

    assert!(!client.is_backpressure_on(), "backpressure should have resumed to off by the time all calls drained");
}
