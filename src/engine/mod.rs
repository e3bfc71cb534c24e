//! Catalog / query engine abstractions.
//!
//! - `AthenaEngine`: Amazon Athena backend (feature `aws`)
//! - `DryRunEngine`: logs and records submissions without running them

#[cfg(feature = "aws")]
pub mod athena;
pub mod dry_run;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::DispatchedQuery;

#[cfg(feature = "aws")]
pub use athena::AthenaEngine;
pub use dry_run::DryRunEngine;

/// Trait for the managed catalog and query service.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Register a partition so it becomes queryable.
    ///
    /// Must be idempotent: repairing an existing partition is a no-op.
    async fn repair_partition(&self, table: &str, date: &str, partition: &str) -> Result<()>;

    /// Submit a query and return the engine's execution id.
    async fn run_query(&self, query: &DispatchedQuery) -> Result<String>;
}

/// Statement registering one partition of a table.
pub fn repair_statement(table: &str, date: &str, partition: &str) -> String {
    format!(
        "ALTER TABLE {} ADD IF NOT EXISTS PARTITION (date = '{}', partition_name = '{}');",
        table,
        escape_literal(date),
        escape_literal(partition)
    )
}

/// Render a SQL template for a dispatched query.
///
/// Supported placeholders:
/// - `{date}`, `{partition}`, `{loc_filter}`, `{start_filter}`, `{stop_filter}`
pub fn render_query(template: &str, query: &DispatchedQuery) -> Result<String> {
    let sql = template
        .replace("{date}", &escape_literal(&query.query_date))
        .replace("{partition}", &escape_literal(&query.partition))
        .replace("{loc_filter}", &query.location_filter)
        .replace("{start_filter}", &query.start_filter.to_string())
        .replace("{stop_filter}", &query.stop_filter.to_string());

    if sql.trim().is_empty() {
        return Err(AppError::query(&query.query_name, "empty SQL template"));
    }
    Ok(sql)
}

/// Escape a value placed inside a single-quoted SQL literal.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> DispatchedQuery {
        DispatchedQuery {
            query_name: "Q".to_string(),
            result_location: "s3://b/t/date=2024-05-01/partition_name=flow_1_Q".to_string(),
            query_date: "2024-05-01".to_string(),
            partition: "flow_1".to_string(),
            location_filter: "x BETWEEN 500 AND 2300".to_string(),
            start_filter: 720,
            stop_filter: 1920,
        }
    }

    #[test]
    fn test_render_query_fills_placeholders() {
        let sql = render_query(
            "SELECT * FROM t WHERE date = '{date}' AND partition_name = '{partition}' \
             AND {loc_filter} AND time_step >= {start_filter} AND time_step < {stop_filter}",
            &query(),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE date = '2024-05-01' AND partition_name = 'flow_1' \
             AND x BETWEEN 500 AND 2300 AND time_step >= 720 AND time_step < 1920"
        );
    }

    #[test]
    fn test_render_rejects_blank_template() {
        assert!(render_query("   ", &query()).is_err());
    }

    #[test]
    fn test_repair_statement_escapes_quotes() {
        assert_eq!(
            repair_statement("tbl", "2024-05-01", "flow_1'x"),
            "ALTER TABLE tbl ADD IF NOT EXISTS PARTITION (date = '2024-05-01', partition_name = 'flow_1''x');"
        );
    }
}
