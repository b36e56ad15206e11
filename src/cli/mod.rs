//! CLI Module
//!
//! Exit codes shared by the daemon and the client binaries

pub mod exit_codes;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
