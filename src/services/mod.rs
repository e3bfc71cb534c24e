//! Service layer for the dispatch pipeline.
//!
//! This module contains the business logic for:
//! - Notification classification (`EventClassifier`)
//! - Partition repair, pruning and baseline upkeep (`PartitionMaintainer`)
//! - Obsolete-data and baseline storage collaborators (`Housekeeping`)
//! - Query fan-out (`QueryDispatcher`)

mod classifier;
mod dispatcher;
pub mod housekeeping;
mod maintenance;

pub use classifier::EventClassifier;
pub use dispatcher::{DispatchOutcome, FailedQuery, QueryDispatcher, SubmittedQuery};
pub use housekeeping::{Housekeeping, ObjectHousekeeping};
pub use maintenance::PartitionMaintainer;
