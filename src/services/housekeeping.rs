//! Obsolete-data and baseline collaborators.
//!
//! Both operate on object storage only and are owned by the storage
//! layout: what "obsolete" means and where baselines live is decided here,
//! while the pipeline only decides *when* to call them.

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{HousekeepingConfig, KeyLayoutConfig};
use crate::storage::ObjectStore;

/// Header row of the baseline table.
const BASELINE_HEADER: &str = "network,source_id";

/// Trait for bookkeeping performed alongside partition repair.
#[async_trait]
pub trait Housekeeping: Send + Sync {
    /// Delete data superseded by the newly arrived `key` of `table`.
    /// Returns the number of deleted objects.
    async fn prune_obsolete(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        key: &str,
        table: &str,
    ) -> Result<usize>;

    /// Record `source_id` as the baseline run of `network`.
    async fn update_baseline(
        &self,
        store: &dyn ObjectStore,
        network: &str,
        source_id: &str,
    ) -> Result<()>;
}

/// Housekeeping over plain objects.
///
/// - Pruning deletes the table's files whose partition is not newer than
///   the arriving one. Files of newer partitions are never touched.
/// - Baselines live in one CSV object with a row per network.
#[derive(Debug, Clone)]
pub struct ObjectHousekeeping {
    settings: HousekeepingConfig,
    layout: KeyLayoutConfig,
}

impl ObjectHousekeeping {
    pub fn new(settings: HousekeepingConfig, layout: KeyLayoutConfig) -> Self {
        Self { settings, layout }
    }
}

#[async_trait]
impl Housekeeping for ObjectHousekeeping {
    async fn prune_obsolete(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        key: &str,
        table: &str,
    ) -> Result<usize> {
        let current = self
            .layout
            .partition_of(key)
            .ok_or_else(|| AppError::key_layout(key, "cannot order partition for pruning"))?;

        // Keys off the layout are legacy files and are pruned too.
        let prefix = format!("{table}/");
        let obsolete: Vec<String> = store
            .list_keys(bucket, &prefix)
            .await?
            .into_iter()
            .filter(|k| k != key && k.ends_with(&self.settings.prune_suffix))
            .filter(|k| self.layout.partition_of(k).is_none_or(|other| other <= current))
            .collect();

        for stale in &obsolete {
            store.delete_object(bucket, stale).await?;
        }

        if !obsolete.is_empty() {
            log::info!(
                "Pruned {} obsolete object(s) of {} superseded by {}",
                obsolete.len(),
                table,
                key
            );
        }
        Ok(obsolete.len())
    }

    async fn update_baseline(
        &self,
        store: &dyn ObjectStore,
        network: &str,
        source_id: &str,
    ) -> Result<()> {
        let bucket = &self.settings.baseline_bucket;
        let key = &self.settings.baseline_key;

        let existing = match store.read_bytes_optional(bucket, key).await? {
            Some(bytes) => String::from_utf8(bytes).map_err(|e| {
                AppError::validation(format!("Baseline table {key} is not valid UTF-8: {e}"))
            })?,
            None => String::new(),
        };

        let table = rewrite_baselines(&existing, network, source_id)?;
        store
            .write_bytes(bucket, key, table.into_bytes(), "text/csv")
            .await?;

        log::info!("Baseline for {} is now {}", network, source_id);
        Ok(())
    }
}

/// Rewrite the baseline CSV so `network` maps to `source_id`.
///
/// The new row comes first, followed by every previous row of another network.
fn rewrite_baselines(existing: &str, network: &str, source_id: &str) -> Result<String> {
    if network.contains([',', '\n', '\r']) || source_id.contains([',', '\n', '\r']) {
        return Err(AppError::validation(format!(
            "Baseline values must not contain separators: '{network}', '{source_id}'"
        )));
    }

    let mut lines = existing.lines().map(|l| l.trim_end_matches('\r'));
    if let Some(header) = lines.next() {
        if header != BASELINE_HEADER {
            return Err(AppError::validation(format!(
                "Unexpected baseline table header '{header}'"
            )));
        }
    }

    let mut table = format!("{BASELINE_HEADER}\n{network},{source_id}\n");
    for line in lines.filter(|l| !l.is_empty()) {
        let row_network = line.split(',').next().unwrap_or_default();
        if row_network != network {
            table.push_str(line);
            table.push('\n');
        }
    }
    Ok(table)
}
