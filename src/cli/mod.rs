//! Command-line interface for digest-forge.
//!
//! Provides commands to run the pipeline, sweep workspaces, inspect the
//! result cache and preview workspace digests.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
