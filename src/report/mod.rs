//! Terminal reporting for finished batches.

pub mod format;

pub use format::*;
