//! Core library modules for forest-loss
//!
//! Aggregation pipeline, classifier and backend implementations. The public
//! surface is re-exported from the crate root.

pub mod backend;
pub mod classify;
pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod reducer;
pub mod region;
pub mod report;
pub mod tiler;
