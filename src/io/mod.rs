//! Input/output helpers.
//!
//! - job descriptor parsing (`jobs`)
//! - line-list read/write and derived lists (`linelist`)
//! - results table and JSON export (`export`)

pub mod export;
pub mod jobs;
pub mod linelist;

pub use export::*;
pub use jobs::*;
pub use linelist::*;
