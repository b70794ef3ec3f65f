// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use crate::unit_tests::common::load_test_config;

#[test]
fn sample_config_loads_and_normalizes() {
    let cfg = load_test_config().expect("sample config should load");

    assert_eq!(cfg.servers, vec!["127.0.0.1:21212".to_string()]);
    assert_eq!(cfg.timeouts.procedure_call_timeout, Duration::from_millis(120_000));
    assert_eq!(cfg.timeouts.connection_setup_timeout, Duration::from_millis(10_000));
    assert_eq!(cfg.limits.request_hard_limit, 1000);
    assert_eq!(cfg.request_priority, 1);
    assert_eq!(cfg.response_thread_count, 4);
    assert!(!cfg.disable_connection_mgmt);
}

#[test]
fn missing_file_is_a_readable_error() {
    oltp_client_rs::cfg::config::ClientConfig::load_from_file("config/does-not-exist.yaml")
        .expect_err("nonexistent path should fail to load");
}
