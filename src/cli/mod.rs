//! CLI-specific utilities for forest-loss
//!
//! This module contains code specific to the command-line interface,
//! separate from the core library functionality.

pub mod demo;
pub mod progress;

pub use progress::ProgressManager;
