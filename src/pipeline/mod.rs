//! Batch pipeline entry points.
//!
//! - `BatchOrchestrator`: runs the repair pass, then the dispatch pass
//! - `BatchReport`: per-event outcomes and batch totals

pub mod batch;
pub mod report;

pub use batch::{BatchOrchestrator, PendingDispatch};
pub use report::{BatchReport, BatchSummary, EventFailure, EventReport, EventStatus, Stage};
