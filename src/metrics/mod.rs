//! Metrics for connection establishment
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! application installs a recorder.

pub mod counters;
pub mod histograms;
