//! winksock-cli: Command-line client for winksock channels
//!
//! Provides the `winksock` binary for listening on, sending to and emitting
//! on channels from a shell.

pub mod commands;
pub mod output;
