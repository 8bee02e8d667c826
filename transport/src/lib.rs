//! GDB annotation client
//!
//! This crate drives a GDB process running with `--annotate=2`: commands are
//! queued and written one at a time, and the annotated output stream is
//! tokenized and assembled into [`events::Event`]s on a background thread.
pub mod annotation;
mod client;
pub mod commands;
pub mod events;
pub mod io;
pub mod parser;
mod queue;
pub mod reader;
pub mod testing;

pub use annotation::AnnotationToken;
pub use client::Client;
pub use commands::{Command, CommandOrigin};
pub use io::{DebuggerTransport, InMemoryTransport, ProcessTransport, Terminate};
pub use reader::{Line, Reader};

/// The escape sequence that introduces an annotation line
pub const ANNOTATION_MARKER: &str = "\x1a\x1a";
