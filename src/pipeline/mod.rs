//! Per-connection send pipeline: priority queue plus the worker loop that
//! drains it.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod queue;
pub mod rate_limiter;
pub mod worker;

pub use queue::{PriorityQueue, QueuedCall};
pub use rate_limiter::RateLimiter;
