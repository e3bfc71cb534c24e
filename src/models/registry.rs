//! Query tag registry.
//!
//! Maps a registry key (a table name, or an energy model id for the
//! energy-trace table) to the result tables it feeds and, for each result
//! table, the ordered list of named queries that materialize it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Result table name to ordered query names.
pub type ResultTables = IndexMap<String, Vec<String>>;

/// Immutable, insertion-ordered query tag registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryTags(IndexMap<String, ResultTables>);

impl QueryTags {
    /// Build a registry from `(key, [(result_table, [query, ..]), ..])` entries.
    pub fn from_entries<'a, I, R>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, R)>,
        R: IntoIterator<Item = (&'a str, &'a [&'a str])>,
    {
        let map = entries
            .into_iter()
            .map(|(key, tables)| {
                let tables = tables
                    .into_iter()
                    .map(|(table, queries)| {
                        let queries = queries.iter().map(|q| q.to_string()).collect();
                        (table.to_string(), queries)
                    })
                    .collect();
                (key.to_string(), tables)
            })
            .collect();
        Self(map)
    }

    /// Result tables registered under `key`.
    pub fn get(&self, key: &str) -> Option<&ResultTables> {
        self.0.get(key)
    }

    /// Whether `key` has an entry (possibly empty).
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Registry keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every query name referenced anywhere in the registry, deduplicated,
    /// in first-seen order.
    pub fn query_names(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for name in self.0.values().flat_map(|t| t.values()).flatten() {
            if !seen.contains(&name.as_str()) {
                seen.push(name);
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
