// src/lib.rs

//! Partition repair and query dispatch library

pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
