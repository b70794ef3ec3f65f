// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection bookkeeping the timeout scheduler and dispatcher read and
//! update: last-response timestamp, outstanding-ping flag, per-procedure
//! stats.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Instant,
};

use dashmap::DashMap;

use crate::response::ProcedureStats;

pub struct ConnectionStats {
    started: Instant,
    last_response_millis: AtomicU64,
    pub outstanding_ping: AtomicBool,
    per_procedure: DashMap<String, ProcedureStats>,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_response_millis: AtomicU64::new(0),
            outstanding_ping: AtomicBool::new(false),
            per_procedure: DashMap::new(),
        }
    }

    pub fn record_response(&self, procedure: &str, status: i8) {
        self.last_response_millis.store(
            self.started.elapsed().as_millis() as u64,
            Ordering::Relaxed,
        );
        self.outstanding_ping.store(false, Ordering::Relaxed);
        self.per_procedure
            .entry(procedure.to_string())
            .or_default()
            .record(status);
    }

    pub fn since_last_response(&self) -> std::time::Duration {
        let last = self.last_response_millis.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_millis() as u64;
        std::time::Duration::from_millis(elapsed.saturating_sub(last))
    }

    pub fn snapshot(&self, procedure: &str) -> ProcedureStats {
        self.per_procedure
            .get(procedure)
            .map(|r| *r.value())
            .unwrap_or_default()
    }
}
