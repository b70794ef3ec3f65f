// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Parsing for the handful of system-procedure result sets the topology
//! manager consumes. The real wire encoding of a VoltDB-style result set is
//! out of scope for this core (see `response.rs`'s invented envelope); the
//! rows below use a minimal JSON standing in for it, decoded in a
//! tolerant, skip-the-bad-row way (count, log up to ten times, keep
//! going).

use std::collections::HashMap;

use bytes::Bytes;
use serde::Deserialize;
use tracing::warn;

use crate::router::snapshot::ProcedureInfo;

const MAX_LOGGED_BAD_ROWS: usize = 10;

#[derive(Debug, Deserialize)]
struct TopoRow {
    partition: i32,
    leader: String,
    sites: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopologyStatistics {
    partitions: Vec<TopoRow>,
    /// Big-endian partition count followed by opaque hash-config bytes, the
    /// same shape `ModuloHashinator::from_hashconfig` expects.
    hashconfig: Vec<u8>,
}

pub struct ParsedTopology {
    /// `(partition, leader host-id, sites)` tuples, unfiltered.
    pub rows: Vec<(i32, String, Vec<String>)>,
    pub hashconfig: Bytes,
}

pub fn parse_topology_statistics(results: &Bytes) -> anyhow::Result<ParsedTopology> {
    let parsed: TopologyStatistics = serde_json::from_slice(results)?;
    Ok(ParsedTopology {
        rows: parsed
            .partitions
            .into_iter()
            .map(|r| (r.partition, r.leader, r.sites))
            .collect(),
        hashconfig: Bytes::from(parsed.hashconfig),
    })
}

#[derive(Debug, Deserialize)]
struct ProcedureJsonColumn {
    #[serde(rename = "readOnly")]
    read_only: bool,
    #[serde(rename = "singlePartition")]
    single_partition: bool,
    #[serde(rename = "partitionParameter")]
    partition_parameter: Option<usize>,
    #[serde(rename = "partitionParameterType")]
    partition_parameter_type: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct ProcedureCatalogRow {
    name: String,
    json: ProcedureJsonColumn,
}

/// Parses `@SystemCatalog("PROCEDURES")`'s rows. Bad rows are counted and
/// logged up to [`MAX_LOGGED_BAD_ROWS`] times, then silently skipped;
/// returns the successfully-parsed rows plus the total bad-row count.
pub fn parse_procedure_catalog(results: &Bytes) -> (HashMap<String, ProcedureInfo>, usize) {
    let mut map = HashMap::new();
    let mut bad = 0usize;

    let rows: Vec<serde_json::Value> = match serde_json::from_slice(results) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "procedure catalog payload was not a JSON array");
            return (map, 1);
        },
    };

    for row in rows {
        match serde_json::from_value::<ProcedureCatalogRow>(row) {
            Ok(row) => {
                let partition_parameter = if row.json.single_partition {
                    match (row.json.partition_parameter, row.json.partition_parameter_type) {
                        (Some(idx), Some(ty)) => Some((idx, ty)),
                        _ => None,
                    }
                } else {
                    None
                };
                map.insert(row.name, ProcedureInfo {
                    read_only: row.json.read_only,
                    single_partition: row.json.single_partition,
                    partition_parameter,
                });
            },
            Err(e) => {
                bad += 1;
                if bad <= MAX_LOGGED_BAD_ROWS {
                    warn!(error = %e, "skipping malformed procedure catalog row");
                }
            },
        }
    }

    (map, bad)
}

#[derive(Debug, Deserialize)]
struct HostInfoRow {
    host_id: String,
    ip: String,
    clientport: u16,
    adminport: u16,
}

pub struct HostEndpoint {
    pub host_id: String,
    pub ip: String,
    pub client_port: u16,
    pub admin_port: u16,
}

/// Parses `@SystemInformation("OVERVIEW")`'s rows into per-host address
/// info.
pub fn parse_system_information(results: &Bytes) -> anyhow::Result<Vec<HostEndpoint>> {
    let rows: Vec<HostInfoRow> = serde_json::from_slice(results)?;
    Ok(rows
        .into_iter()
        .map(|r| HostEndpoint {
            host_id: r.host_id,
            ip: r.ip,
            client_port: r.clientport,
            admin_port: r.adminport,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_topology_statistics() {
        let json = serde_json::json!({
            "partitions": [{"partition": 0, "leader": "host-a", "sites": ["host-a", "host-b"]}],
            "hashconfig": [0u8, 0, 0, 3, 1, 2, 3],
        });
        let results = Bytes::from(serde_json::to_vec(&json).unwrap());
        let parsed = parse_topology_statistics(&results).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].0, 0);
        assert_eq!(parsed.hashconfig.len(), 7);
    }

    #[test]
    fn skips_malformed_procedure_rows_and_counts_them() {
        let json = serde_json::json!([
            {"name": "Good", "json": {"readOnly": true, "singlePartition": false}},
            {"name": "Bad"},
        ]);
        let results = Bytes::from(serde_json::to_vec(&json).unwrap());
        let (map, bad) = parse_procedure_catalog(&results);
        assert_eq!(bad, 1);
        assert!(map.contains_key("Good"));
    }

    #[test]
    fn parses_system_information_overview() {
        let json = serde_json::json!([
            {"host_id": "h0", "ip": "10.0.0.1", "clientport": 21212, "adminport": 21211},
        ]);
        let results = Bytes::from(serde_json::to_vec(&json).unwrap());
        let hosts = parse_system_information(&results).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host_id, "h0");
    }
}
