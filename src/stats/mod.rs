//! Statistics for relay sessions

pub mod metrics;

pub use metrics::SessionStats;
