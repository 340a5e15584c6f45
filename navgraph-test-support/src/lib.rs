//! Shared test utilities used across navgraph crates.

pub mod ci;
pub mod datasets;
pub mod tracing;
