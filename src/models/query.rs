//! Query submission data structures.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// User metadata attached to an uploaded object.
pub type ObjectMetadata = HashMap<String, String>;

/// Metadata key naming the simulated network.
pub const NETWORK_KEY: &str = "network";

/// Metadata key marking a baseline run.
pub const BASELINE_KEY: &str = "is_baseline";

/// Which spatial subset of simulation output a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationFilter {
    /// Default filter over a cross-section of the road
    CrossSection,
    /// Edge-based filter for networks that need it
    Edge,
}

impl LocationFilter {
    /// Select the filter for an object: `Edge` iff its `network` metadata
    /// is one of `edge_networks`.
    pub fn for_metadata(metadata: &ObjectMetadata, edge_networks: &[String]) -> Self {
        match metadata.get(NETWORK_KEY) {
            Some(network) if edge_networks.iter().any(|n| n == network) => Self::Edge,
            _ => Self::CrossSection,
        }
    }
}

/// Baseline reference carried by an object's metadata, if it marks one.
///
/// Only the literal string `"True"` counts.
pub fn baseline_network(metadata: &ObjectMetadata) -> Option<&str> {
    let network = metadata.get(NETWORK_KEY)?;
    match metadata.get(BASELINE_KEY).map(String::as_str) {
        Some("True") => Some(network),
        _ => None,
    }
}

/// One query submission handed to the query engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedQuery {
    /// Named query to run
    pub query_name: String,

    /// Where the engine writes the query result
    pub result_location: String,

    /// Partition date of the source data
    pub query_date: String,

    /// Partition name of the source data
    pub partition: String,

    /// Resolved location filter expression
    pub location_filter: String,

    /// First step included in aggregation
    pub start_filter: u64,

    /// Last step included in aggregation
    pub stop_filter: u64,
}

/// Build the result location for one query of one event.
pub fn result_location(
    bucket: &str,
    result_table: &str,
    query_date: &str,
    source_id: &str,
    query_name: &str,
) -> String {
    format!(
        "s3://{}/{}/date={}/partition_name={}_{}",
        bucket.trim_end_matches('/'),
        result_table,
        query_date,
        source_id,
        query_name
    )
}
