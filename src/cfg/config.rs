// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::HashScheme;

/// Authentication and wire-security settings: username/password (plus a
/// cleartext override), the password hashing scheme, and an optional TLS
/// trust-store path.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Send `password` unhashed rather than through `hash_scheme`.
    #[serde(default)]
    pub cleartext: bool,
    #[serde(default)]
    pub hash_scheme: HashScheme,
    #[serde(default)]
    pub enable_ssl: bool,
    /// Path to a trust-store / cert bundle; only consulted when
    /// `enable_ssl` is set. This core does not implement TLS itself — it
    /// is the caller's job to hand it a pre-negotiated stream, or a future
    /// extension's — but the setting still round-trips.
    #[serde(default)]
    pub ssl_config: Option<String>,
}

/// Timeouts governing one call's lifecycle and one connection's setup.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimeoutConfig {
    #[serde(with = "serde_millis")]
    pub connection_setup_timeout: Duration,
    #[serde(with = "serde_millis")]
    pub procedure_call_timeout: Duration,
    #[serde(with = "serde_millis")]
    pub connection_response_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection_setup_timeout: Duration::from_secs(10),
            procedure_call_timeout: Duration::from_secs(2 * 60),
            connection_response_timeout: Duration::from_secs(10),
        }
    }
}

/// Admission and backpressure limits: the outstanding-transaction cap, the
/// request registry's hard/warning/resume thresholds, and the per-connection
/// network backpressure threshold.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LimitsConfig {
    pub outstanding_txn_limit: usize,
    pub request_hard_limit: usize,
    pub request_warning_level: usize,
    pub request_resume_level: usize,
    /// Per-connection queue length past which `NetworkBackpressure` turns
    /// on for that connection.
    pub network_backpressure_level: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            outstanding_txn_limit: 2000,
            request_hard_limit: 1000,
            request_warning_level: 900,
            request_resume_level: 700,
            network_backpressure_level: 5000,
        }
    }
}

/// Reconnection pacing: `reconnect_delay` paces the resubscribe-after-drop
/// task, `reconnect_retry_delay` paces the connection task's and
/// first-connection-recovery task's retry loop.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReconnectConfig {
    #[serde(with = "serde_millis")]
    pub reconnect_delay: Duration,
    #[serde(with = "serde_millis")]
    pub reconnect_retry_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            reconnect_retry_delay: Duration::from_secs(10),
        }
    }
}

/// Top-level client configuration: logical domains as nested structs,
/// loaded from YAML and then validated.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientConfig {
    /// Initial connection targets, `host:port`. Also seeds the historical
    /// connect-target set the first-connection recovery task retries.
    pub servers: Vec<String>,

    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Default priority (1-8, lower is more urgent) applied to calls that
    /// don't set one explicitly.
    #[serde(default = "default_request_priority")]
    pub request_priority: u8,

    /// Transactions-per-second cap shared across all connections; `None`
    /// disables the rate limiter entirely.
    #[serde(default)]
    pub txn_per_sec_rate_limit: Option<usize>,

    /// Response-dispatcher worker count; defaults to 4.
    #[serde(default = "default_response_thread_count")]
    pub response_thread_count: usize,

    /// Disables all background connection management (subscribe, refresh,
    /// reconnect, recovery) — the client only uses the connections it was
    /// given at startup and never grows or heals the set.
    #[serde(default)]
    pub disable_connection_mgmt: bool,
}

fn default_request_priority() -> u8 {
    1
}

fn default_response_thread_count() -> usize {
    4
}

impl ClientConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: ClientConfig = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.servers.is_empty(), "at least one server address is required");
        self.request_priority = crate::invocation::clamp_priority(self.request_priority);
        ensure!(self.limits.request_warning_level <= self.limits.request_hard_limit,
            "requestWarningLevel must not exceed requestHardLimit");
        ensure!(self.limits.request_resume_level <= self.limits.request_warning_level,
            "requestResumeLevel must not exceed requestWarningLevel");
        if self.response_thread_count == 0 {
            self.response_thread_count = default_response_thread_count();
        }
        Ok(())
    }

    /// Fluent builder entry point for the common construction path.
    pub fn builder(servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            auth: AuthConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            reconnect: ReconnectConfig::default(),
            request_priority: default_request_priority(),
            txn_per_sec_rate_limit: None,
            response_thread_count: default_response_thread_count(),
            disable_connection_mgmt: false,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth.username = username.into();
        self.auth.password = password.into();
        self
    }

    pub fn with_txn_per_sec_rate_limit(mut self, limit: usize) -> Self {
        self.txn_per_sec_rate_limit = Some(limit);
        self
    }

    pub fn with_request_priority(mut self, priority: u8) -> Self {
        self.request_priority = priority;
        self
    }
}

/// Serde helper representing a `Duration` as milliseconds, the granularity
/// every timeout in this config is expressed at.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
