// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use oltp_client_rs::cfg::config::ClientConfig;

/// Path to the sample configuration shipped at the repository root,
/// overridable the same way `TEST_CONFIG` overrides the iSCSI fixture path.
pub fn test_config_path() -> String {
    std::env::var("TEST_CONFIG").unwrap_or_else(|_| "config/client.yaml".into())
}

pub fn load_test_config() -> Result<ClientConfig> {
    let path = test_config_path();
    ClientConfig::load_from_file(&path).with_context(|| format!("failed to load {path:?}"))
}
