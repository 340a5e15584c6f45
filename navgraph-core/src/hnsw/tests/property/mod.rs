//! Property-based generators and checks for the HNSW index.

mod strategies;
mod tests;
mod types;
