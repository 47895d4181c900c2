//! inSTead Interface - command line
//!
//! Responsibilities:
//! - Argument parsing and config loading
//! - Wiring the JSON store, LLM provider and revision controller together
//! - Pretty / JSON rendering of turns and alternate history

pub mod cli;
mod provider_config;


pub use cli::{CliContext, CliError, OutputFormat, run_cli};
