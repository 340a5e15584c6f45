//! Integration tests for the HNSW index.

mod build;
mod property;
