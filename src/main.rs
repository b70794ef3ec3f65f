// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use oltp_client_rs::{
    cfg::{cli::resolve_config_path, config::ClientConfig, logger::init_logger},
    client::Client,
    invocation::{ParamValue, ParameterSet},
};
use tokio::time::timeout;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logger("config/logger.yaml")?;

    let cfg = resolve_config_path("config/client.yaml")
        .and_then(ClientConfig::load_from_file)
        .context("failed to resolve or load config")?;

    let client = Client::connect(cfg).await.context("failed to connect to cluster")?;
    info!(connections = client.connection_count(), "connected");

    let response = timeout(
        Duration::from_secs(5),
        client.call_async(
            "@Ping",
            ParameterSet::Deferred(vec![ParamValue::Varchar("oltp-cli".to_string())]),
            None,
            None,
            None,
        ),
    )
    .await
    .context("ping timed out")?;

    match response {
        Ok(resp) => info!(status = resp.status, round_trip = ?resp.round_trip, "ping succeeded"),
        Err(e) => info!(error = %e, "ping failed"),
    }

    client.shutdown(Duration::from_secs(10)).await;
    Ok(())
}
