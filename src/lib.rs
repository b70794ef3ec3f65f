// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `oltp-client-rs`: the client runtime for a distributed, partitioned OLTP
//! database. See the module list below for the component breakdown:
//! invocation codec, connection endpoints, the per-connection send
//! pipeline, the request registry, the router, the topology manager, the
//! timeout scheduler, the response dispatcher, and the public façade in
//! [`client`].

pub mod cfg;
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod invocation;
pub mod notify;
pub mod pipeline;
pub mod procedures;
pub mod registry;
pub mod response;
pub mod router;
pub mod timeout;
pub mod topology;
