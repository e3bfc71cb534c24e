//! Application configuration structures.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::query::LocationFilter;
use crate::models::registry::QueryTags;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Batch execution settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Object key grammar shared with upstream producers
    #[serde(default)]
    pub layout: KeyLayoutConfig,

    /// Tracked tables and query fan-out
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Location filter tokens
    #[serde(default)]
    pub filters: FilterConfig,

    /// Aggregation window
    #[serde(default)]
    pub window: WindowConfig,

    /// Where query results are written
    #[serde(default)]
    pub results: ResultsConfig,

    /// Obsolete data and baseline bookkeeping
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,

    /// Athena connection settings
    #[serde(default)]
    pub athena: AthenaConfig,

    /// SQL templates by query name
    #[serde(default)]
    pub queries: IndexMap<String, String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_concurrent == 0 {
            return Err(AppError::validation("pipeline.max_concurrent must be > 0"));
        }
        if self.layout.metadata_suffix.is_empty() {
            return Err(AppError::validation("layout.metadata_suffix is empty"));
        }
        if self.layout.date_segment.is_empty() || self.layout.partition_segment.is_empty() {
            return Err(AppError::validation("layout segment names must not be empty"));
        }
        if self.layout.source_prefix.is_empty() {
            return Err(AppError::validation("layout.source_prefix is empty"));
        }
        if self.registry.tables.is_empty() {
            return Err(AppError::validation("No tracked tables defined"));
        }
        if !self.registry.is_tracked(&self.registry.energy_table) {
            return Err(AppError::validation(format!(
                "registry.energy_table '{}' is not a tracked table",
                self.registry.energy_table
            )));
        }
        if !self.registry.is_tracked(&self.registry.aggregate_table) {
            return Err(AppError::validation(format!(
                "registry.aggregate_table '{}' is not a tracked table",
                self.registry.aggregate_table
            )));
        }
        if self.filters.cross_section.trim().is_empty() || self.filters.edge.trim().is_empty() {
            return Err(AppError::validation("Location filter tokens must not be empty"));
        }
        if self.window.horizon_steps == 0 {
            return Err(AppError::validation("window.horizon_steps must be > 0"));
        }
        if self
            .window
            .warmup_steps
            .checked_add(self.window.horizon_steps)
            .is_none()
        {
            return Err(AppError::validation(
                "window.warmup_steps + window.horizon_steps overflows",
            ));
        }
        if self.results.bucket.trim().is_empty() {
            return Err(AppError::validation("results.bucket is empty"));
        }
        Ok(())
    }

    /// Query names referenced by the registry that have no SQL template.
    pub fn missing_query_templates(&self) -> Vec<String> {
        self.registry
            .tags
            .query_names()
            .into_iter()
            .filter(|name| !self.queries.contains_key(*name))
            .map(str::to_string)
            .collect()
    }
}

/// Batch execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Events processed concurrently within one pass
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Object key grammar: `table/.../<date_segment>=D/<partition_segment>=P/file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLayoutConfig {
    /// Suffix of metadata sidecar objects that are deleted on arrival
    #[serde(default = "defaults::metadata_suffix")]
    pub metadata_suffix: String,

    /// Name of the date path segment (third from the end)
    #[serde(default = "defaults::date_segment")]
    pub date_segment: String,

    /// Name of the partition path segment (second from the end)
    #[serde(default = "defaults::partition_segment")]
    pub partition_segment: String,

    /// `chrono` format the date value must match
    #[serde(default = "defaults::date_format")]
    pub date_format: String,

    /// Prefix of the source id derived from a partition name
    #[serde(default = "defaults::source_prefix")]
    pub source_prefix: String,
}

impl KeyLayoutConfig {
    /// Parse a date segment value with `date_format`.
    pub fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(value, &self.date_format).ok()
    }

    /// `(date, partition)` of a data key, ordered oldest first.
    ///
    /// `None` when the key does not follow the layout.
    pub fn partition_of<'k>(&self, key: &'k str) -> Option<(NaiveDate, &'k str)> {
        let segments: Vec<&str> = key.split('/').collect();
        let n = segments.len();
        if n < 4 {
            return None;
        }
        let value = |segment: &'k str, name: &str| {
            segment
                .split_once('=')
                .filter(|(k, v)| k == &name && !v.is_empty())
                .map(|(_, v)| v)
        };
        let date = self.parse_date(value(segments[n - 3], &self.date_segment)?)?;
        let partition = value(segments[n - 2], &self.partition_segment)?;
        Some((date, partition))
    }
}

impl Default for KeyLayoutConfig {
    fn default() -> Self {
        Self {
            metadata_suffix: defaults::metadata_suffix(),
            date_segment: defaults::date_segment(),
            partition_segment: defaults::partition_segment(),
            date_format: defaults::date_format(),
            source_prefix: defaults::source_prefix(),
        }
    }
}

/// Tracked tables and query fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Tables whose uploads are processed at all
    #[serde(default = "defaults::tables")]
    pub tables: Vec<String>,

    /// Aggregate table whose older files are pruned on each upload
    #[serde(default = "defaults::aggregate_table")]
    pub aggregate_table: String,

    /// Table whose fan-out is keyed by energy model id
    #[serde(default = "defaults::energy_table")]
    pub energy_table: String,

    /// Registry key -> result table -> query names
    #[serde(default = "defaults::tags")]
    pub tags: QueryTags,
}

impl RegistryConfig {
    pub fn is_tracked(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tables: defaults::tables(),
            aggregate_table: defaults::aggregate_table(),
            energy_table: defaults::energy_table(),
            tags: defaults::tags(),
        }
    }
}

/// Location filter tokens substituted into query templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "defaults::cross_section_filter")]
    pub cross_section: String,

    #[serde(default = "defaults::edge_filter")]
    pub edge: String,

    /// Networks whose queries use the edge filter
    #[serde(default = "defaults::edge_networks")]
    pub edge_networks: Vec<String>,
}

impl FilterConfig {
    /// Filter expression for a location filter mode.
    pub fn token(&self, filter: LocationFilter) -> &str {
        match filter {
            LocationFilter::CrossSection => &self.cross_section,
            LocationFilter::Edge => &self.edge,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cross_section: defaults::cross_section_filter(),
            edge: defaults::edge_filter(),
            edge_networks: defaults::edge_networks(),
        }
    }
}

/// Aggregation window in simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "defaults::warmup_steps")]
    pub warmup_steps: u64,

    #[serde(default = "defaults::horizon_steps")]
    pub horizon_steps: u64,
}

impl WindowConfig {
    pub fn start_filter(&self) -> u64 {
        self.warmup_steps
    }

    pub fn stop_filter(&self) -> u64 {
        self.warmup_steps.saturating_add(self.horizon_steps)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            warmup_steps: defaults::warmup_steps(),
            horizon_steps: defaults::horizon_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Bucket receiving query results
    #[serde(default = "defaults::data_bucket")]
    pub bucket: String,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            bucket: defaults::data_bucket(),
        }
    }
}

/// Obsolete data and baseline bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    /// Only keys with this suffix are considered when pruning
    #[serde(default = "defaults::prune_suffix")]
    pub prune_suffix: String,

    #[serde(default = "defaults::data_bucket")]
    pub baseline_bucket: String,

    /// CSV object holding `network,source_id` rows
    #[serde(default = "defaults::baseline_key")]
    pub baseline_key: String,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            prune_suffix: defaults::prune_suffix(),
            baseline_bucket: defaults::data_bucket(),
            baseline_key: defaults::baseline_key(),
        }
    }
}

/// Athena connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthenaConfig {
    #[serde(default = "defaults::athena_database")]
    pub database: String,

    #[serde(default = "defaults::athena_workgroup")]
    pub workgroup: String,

    /// Delay between status checks while waiting for a repair
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for a repair statement
    #[serde(default = "defaults::repair_timeout")]
    pub repair_timeout_secs: u64,
}

impl Default for AthenaConfig {
    fn default() -> Self {
        Self {
            database: defaults::athena_database(),
            workgroup: defaults::athena_workgroup(),
            poll_interval_ms: defaults::poll_interval(),
            repair_timeout_secs: defaults::repair_timeout(),
        }
    }
}

mod defaults {
    use crate::models::registry::QueryTags;

    // Pipeline defaults
    pub fn max_concurrent() -> usize {
        4
    }

    // Layout defaults
    pub fn metadata_suffix() -> String {
        ".metadata".into()
    }
    pub fn date_segment() -> String {
        "date".into()
    }
    pub fn partition_segment() -> String {
        "partition_name".into()
    }
    pub fn date_format() -> String {
        "%Y-%m-%d".into()
    }
    pub fn source_prefix() -> String {
        "flow".into()
    }

    // Registry defaults
    pub fn tables() -> Vec<String> {
        [
            "fact_vehicle_trace",
            "fact_energy_trace",
            "fact_vehicle_counts_by_time",
            "fact_safety_metrics",
            "fact_safety_metrics_agg",
            "fact_network_throughput_agg",
            "fact_network_inflows_outflows",
            "fact_vehicle_fuel_efficiency_agg",
            "fact_network_metrics_by_distance_agg",
            "fact_network_metrics_by_time_agg",
            "fact_network_fuel_efficiency_agg",
            "leaderboard_chart",
            "leaderboard_chart_agg",
            "fact_top_scores",
            "metadata_table",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn aggregate_table() -> String {
        "leaderboard_chart_agg".into()
    }
    pub fn energy_table() -> String {
        "fact_energy_trace".into()
    }
    pub fn tags() -> QueryTags {
        QueryTags::from_entries([
            (
                "fact_vehicle_trace",
                vec![
                    (
                        "fact_energy_trace",
                        &[
                            "POWER_DEMAND_MODEL",
                            "POWER_DEMAND_MODEL_DENOISED_ACCEL",
                            "POWER_DEMAND_MODEL_DENOISED_ACCEL_VEL",
                        ][..],
                    ),
                    (
                        "fact_safety_metrics",
                        &["FACT_SAFETY_METRICS"][..],
                    ),
                    (
                        "fact_network_throughput_agg",
                        &["FACT_NETWORK_THROUGHPUT_AGG"][..],
                    ),
                    (
                        "fact_network_inflows_outflows",
                        &["FACT_NETWORK_INFLOWS_OUTFLOWS"][..],
                    ),
                    (
                        "fact_vehicle_counts_by_time",
                        &["FACT_VEHICLE_COUNTS_BY_TIME"][..],
                    ),
                ],
            ),
            ("fact_energy_trace", vec![]),
            (
                "POWER_DEMAND_MODEL_DENOISED_ACCEL",
                vec![
                    (
                        "fact_vehicle_fuel_efficiency_agg",
                        &["FACT_VEHICLE_FUEL_EFFICIENCY_AGG"][..],
                    ),
                    (
                        "fact_network_metrics_by_distance_agg",
                        &["FACT_NETWORK_METRICS_BY_DISTANCE_AGG"][..],
                    ),
                    (
                        "fact_network_metrics_by_time_agg",
                        &["FACT_NETWORK_METRICS_BY_TIME_AGG"][..],
                    ),
                ],
            ),
            ("POWER_DEMAND_MODEL", vec![]),
            ("POWER_DEMAND_MODEL_DENOISED_ACCEL_VEL", vec![]),
            (
                "fact_safety_metrics",
                vec![("fact_safety_metrics_agg", &["FACT_SAFETY_METRICS_AGG"][..])],
            ),
            (
                "fact_vehicle_fuel_efficiency_agg",
                vec![(
                    "fact_network_fuel_efficiency_agg",
                    &["FACT_NETWORK_FUEL_EFFICIENCY_AGG"][..],
                )],
            ),
            (
                "fact_network_fuel_efficiency_agg",
                vec![("leaderboard_chart", &["LEADERBOARD_CHART"][..])],
            ),
            (
                "leaderboard_chart",
                vec![
                    ("leaderboard_chart_agg", &["LEADERBOARD_CHART_AGG"][..]),
                    ("fact_top_scores", &["FACT_TOP_SCORES"][..]),
                ],
            ),
        ])
    }

    // Filter defaults
    pub fn cross_section_filter() -> String {
        "x BETWEEN 500 AND 2300".into()
    }
    pub fn edge_filter() -> String {
        "edge_id <> ALL (VALUES 'ghost0', '119257908#3')".into()
    }
    pub fn edge_networks() -> Vec<String> {
        vec!["I-210 without Ramps".into()]
    }

    // Window defaults
    pub fn warmup_steps() -> u64 {
        720
    }
    pub fn horizon_steps() -> u64 {
        1200
    }

    // Storage defaults
    pub fn data_bucket() -> String {
        "circles.data.pipeline".into()
    }
    pub fn prune_suffix() -> String {
        ".csv".into()
    }
    pub fn baseline_key() -> String {
        "baseline_table/baselines.csv".into()
    }

    // Athena defaults
    pub fn athena_database() -> String {
        "circles".into()
    }
    pub fn athena_workgroup() -> String {
        "primary".into()
    }
    pub fn poll_interval() -> u64 {
        500
    }
    pub fn repair_timeout() -> u64 {
        120
    }
}
