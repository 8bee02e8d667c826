//! Launching the debugger process
//!
//! GDB is started with the annotation protocol enabled and its standard
//! output and error merged into one stream, which is what
//! [`transport::Client`] expects to read.
use std::time::Duration;

pub mod gdb;

pub use gdb::{GdbConfig, spawn};

/// Arguments that put GDB into the annotation protocol
pub const PROTOCOL_ARGS: &[&str] = &["--annotate=2", "--silent"];

/// Default time to wait for GDB to print its first prompt
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
