//! Invocation codec: serializes/deserializes a stored-procedure call to the
//! on-wire byte layout. Parameter wire framing is opaque to this module;
//! see [`params`].

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod codec;
pub mod params;

pub use codec::{
    ASYNC_CATALOG_HANDLE, ASYNC_TOPO_HANDLE, DecodedInvocation, Invocation, MAX_CLIENT_HANDLE,
    MULTI_PARTITION_ID, NO_BATCH_TIMEOUT, ROUTE_BY_PARAMETER, clamp_priority, read_from,
};
pub use params::{LazyParams, ParamValue, ParameterSet};
