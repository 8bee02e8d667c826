//! IO abstraction over the debugger process
//!
//! The core trait [`DebuggerTransport`] allows plugging in different ways of
//! talking to the debugger: a spawned child process, or in-memory channels
//! for tests.
//!
//! # Examples
//!
//! ```
//! use transport::io::InMemoryTransport;
//! use transport::Client;
//!
//! let (client_transport, _debugger_transport) = InMemoryTransport::pair();
//! let (tx, _rx) = crossbeam_channel::unbounded();
//! let client = Client::with_transport(client_transport, tx)?;
//! # Ok::<(), eyre::Error>(())
//! ```

use std::io::{Read, Write};

mod memory;
mod process;


pub use memory::{InMemoryReader, InMemoryTransport, InMemoryWriter};
pub use process::ProcessTransport;

/// Ends the other side of a transport.
///
/// Terminating must unblock a reader that is waiting for output: for a
/// process this kills the child, which closes its standard output.
pub trait Terminate: Send {
    fn terminate(&mut self) -> eyre::Result<()>;
}

/// Bidirectional line transport to a debugger
///
/// The transport is split into a reader, which is moved into the background
/// worker, a writer for commands, and a handle to end the conversation.
/// Readers block until data is available and report end of input once the
/// debugger has gone away.
pub trait DebuggerTransport: Send + 'static {
    type Reader: Read + Send + 'static;

    type Writer: Write + Send + 'static;

    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer, Box<dyn Terminate>)>;
}
