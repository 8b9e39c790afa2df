//! muster-cli: Command-line interface for muster
//!
//! Provides the `muster` binary, which either hosts a match or joins one
//! and then hands the terminal to an operator console.

pub mod commands;
pub mod console;
pub mod output;
