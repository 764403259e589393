//! Driftwatch - advisory anomaly detection for predicted vs. actual behavior
//!
//! This library correlates predicted and observed records, computes per-metric
//! baselines, runs a fixed set of detectors (cost, quality, latency, policy),
//! and keeps the resulting anomalies in an append-only store. Every record is
//! stamped with the algorithm version that produced it, so any past window can
//! be replayed deterministically for audit.

pub mod baseline;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod detector;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod replay;
pub mod scorer;
pub mod service;
pub mod store;
pub mod trust;

pub use error::{Error, Result};
