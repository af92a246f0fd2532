//! Utility functions for display formatting.

pub mod format;

pub use format::{time_ago, truncate_string};
