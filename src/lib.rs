//! Cuello - performance bottleneck and anomaly detection engine
//!
//! Turns raw stepped-load benchmark telemetry (CPU, memory, per-device I/O,
//! RPC latency, QPS) into bottleneck diagnoses: anomalous latency samples,
//! metric/load correlations, performance cliffs between adjacent load
//! steps, and a classified dominant bottleneck with a severity grade.
//!
//! The engine is pure and offline: it consumes an immutable sample table
//! and produces serializable diagnostic records. Ingestion, charting, and
//! report rendering live in external collaborators.

pub mod aggregate;
pub mod classifier;
pub mod cliff;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod outlier;
pub mod sample;
pub mod severity;
pub mod stats;
