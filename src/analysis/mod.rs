//! Analysis modules.
//!
//! Deterministic anomaly rules, descriptive statistics, summary
//! normalization and the cross-record aggregator.

pub mod aggregator;
pub mod detector;
pub mod stats;
pub mod summary;

pub use aggregator::{aggregate, Aggregate};
pub use detector::{AnomalyDetector, ThresholdTable};
pub use summary::Summary;
