//! CLI command implementations

pub mod collect;
pub mod error;

pub use collect::{Cli, CollectArgs, Commands, OutputLayout};
pub use error::CliError;
