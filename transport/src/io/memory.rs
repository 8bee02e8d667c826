//! In-memory transport implementation for testing

use std::io::{self, BufRead, Cursor, Read, Write};

use crossbeam_channel::{Receiver, Sender};

use super::{DebuggerTransport, Terminate};

/// In-memory transport for testing
///
/// Data written to one end of a [`InMemoryTransport::pair`] can be read from
/// the other, so tests can play the part of the debugger without spawning a
/// process.
pub struct InMemoryTransport {
    reader: InMemoryReader,
    writer: InMemoryWriter,
    shutdown: Sender<()>,
}

/// Reader half of in-memory transport
///
/// Blocks until data arrives. Reports end of input once the other end's
/// writer is dropped or this end is terminated.
pub struct InMemoryReader {
    buffer: Cursor<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    shutdown: Receiver<()>,
}

/// Writer half of in-memory transport
pub struct InMemoryWriter {
    tx: Sender<Vec<u8>>,
}

struct InMemoryTerminator {
    shutdown: Option<Sender<()>>,
}

impl InMemoryTransport {
    /// Create a connected pair of in-memory transports
    ///
    /// Returns `(client_transport, debugger_transport)`.
    pub fn pair() -> (Self, Self) {
        let (client_tx, debugger_rx) = crossbeam_channel::unbounded();
        let (debugger_tx, client_rx) = crossbeam_channel::unbounded();

        (
            Self::new(client_rx, client_tx),
            Self::new(debugger_rx, debugger_tx),
        )
    }

    fn new(rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>) -> Self {
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(0);
        Self {
            reader: InMemoryReader {
                buffer: Cursor::new(Vec::new()),
                rx,
                shutdown: shutdown_rx,
            },
            writer: InMemoryWriter { tx },
            shutdown,
        }
    }
}

impl DebuggerTransport for InMemoryTransport {
    type Reader = InMemoryReader;
    type Writer = InMemoryWriter;

    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer, Box<dyn Terminate>)> {
        let terminator = InMemoryTerminator {
            shutdown: Some(self.shutdown),
        };
        Ok((self.reader, self.writer, Box::new(terminator)))
    }
}

impl Terminate for InMemoryTerminator {
    fn terminate(&mut self) -> eyre::Result<()> {
        // disconnecting the shutdown channel wakes the reader
        if self.shutdown.take().is_some() {
            tracing::debug!("terminating in-memory transport");
        }
        Ok(())
    }
}

impl BufRead for InMemoryReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.buffer.position() >= self.buffer.get_ref().len() as u64 {
            crossbeam_channel::select! {
                recv(self.rx) -> msg => match msg {
                    Ok(data) => self.buffer = Cursor::new(data),
                    // other end dropped its writer
                    Err(_) => return Ok(&[]),
                },
                recv(self.shutdown) -> _ => return Ok(&[]),
            }
        }

        self.buffer.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.buffer.consume(amt)
    }
}

impl Read for InMemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let len = std::cmp::min(available.len(), buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        self.consume(len);
        Ok(len)
    }
}

impl Write for InMemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
