// src/models/mod.rs

//! Domain models for the dispatch pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
mod query;
mod registry;

// Re-export all public types
pub use config::{
    AthenaConfig, Config, FilterConfig, HousekeepingConfig, KeyLayoutConfig, PipelineConfig,
    RegistryConfig, ResultsConfig, WindowConfig,
};
pub use event::{
    Classification, Notification, ParsedEvent, S3Bucket, S3Entity, S3Event, S3EventRecord,
    S3Object, decode_key,
};
pub use query::{
    BASELINE_KEY, DispatchedQuery, LocationFilter, NETWORK_KEY, ObjectMetadata, baseline_network,
    result_location,
};
pub use registry::{QueryTags, ResultTables};
