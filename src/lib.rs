//! Command-line front end for RigVM: configuration, logging, registry setup
//! and the subcommands behind the `rigvm` binary.

pub mod commands;
pub mod config;
pub mod host;
pub mod logging;
