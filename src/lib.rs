//! `specpar` library crate.
//!
//! The binary (`specpar`) is a thin wrapper around this library so that:
//!
//! - the solver is testable against stub engines without spawning processes
//! - the grid interpolator and engine adapter are reusable on their own
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod domain;
pub mod engine;
pub mod error;
pub mod grid;
pub mod initial;
pub mod io;
pub mod logging;
pub mod math;
pub mod report;
pub mod solver;

#[cfg(test)]
pub(crate) mod testkit;
