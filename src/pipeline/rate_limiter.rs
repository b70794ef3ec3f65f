// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Optional global rate limiter (`txn_per_sec_rate_limit`). A token bucket
//! refilled once per second; when unconfigured the send pipeline skips
//! this step entirely.

use std::sync::Arc;

use tokio::sync::Semaphore;

pub struct RateLimiter {
    bucket: Arc<Semaphore>,
    rate: usize,
}

impl RateLimiter {
    /// Spawns the background refill task. The returned limiter is cheap to
    /// clone-share via `Arc` by its caller.
    pub fn start(rate_per_second: usize) -> Arc<Self> {
        let limiter = Arc::new(Self {
            bucket: Arc::new(Semaphore::new(rate_per_second)),
            rate: rate_per_second,
        });
        let refill = limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let available = refill.bucket.available_permits();
                if available < refill.rate {
                    refill.bucket.add_permits(refill.rate - available);
                }
            }
        });
        limiter
    }

    pub async fn wait_for_slot(&self) {
        // Permit is intentionally forgotten: it represents one transaction
        // sent this second, not a resource to give back.
        if let Ok(permit) = self.bucket.acquire().await {
            permit.forget();
        }
    }
}
