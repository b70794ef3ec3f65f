// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::all)]

mod unit_tests {
    pub mod common;

    mod test_config_loading;
    mod test_rate_limiter;
    mod test_router_snapshot;
}
