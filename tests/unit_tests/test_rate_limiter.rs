// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::{Duration, Instant};

use oltp_client_rs::pipeline::RateLimiter;

#[tokio::test]
async fn limiter_admits_rate_per_tick_and_refills_on_the_second() {
    let limiter = RateLimiter::start(2);

    // Two slots available immediately; both should resolve well under the
    // one-second refill tick.
    let start = Instant::now();
    tokio::time::timeout(Duration::from_millis(50), limiter.wait_for_slot())
        .await
        .expect("first slot should be immediately available");
    tokio::time::timeout(Duration::from_millis(50), limiter.wait_for_slot())
        .await
        .expect("second slot should be immediately available");
    assert!(start.elapsed() < Duration::from_millis(200), "first two slots should not wait for a refill");

    // The bucket is now empty; a third caller has to wait for the next
    // refill tick before it is admitted.
    let third_start = Instant::now();
    tokio::time::timeout(Duration::from_millis(1500), limiter.wait_for_slot())
        .await
        .expect("refill tick should eventually admit a third caller");
    assert!(third_start.elapsed() >= Duration::from_millis(400), "third slot was admitted before any refill could have happened");
}
