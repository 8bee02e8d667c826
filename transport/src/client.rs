use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use eyre::{Context, Result};

use crate::events::Event;
use crate::io::{DebuggerTransport, Terminate};
use crate::parser::ProtocolParser;
use crate::queue::CommandQueue;
use crate::reader::HandWrittenReader;
use crate::{Command, Reader};

/// Client for a debugger speaking the annotation protocol
///
/// Commands are queued with [`Client::enqueue`] and written one at a time by
/// a background worker, which also reads the debugger's output and forwards
/// the parsed [`Event`]s. The next command is only written once the previous
/// one's prompt has been seen.
pub struct Client {
    queue: Arc<CommandQueue>,
    terminator: Option<Box<dyn Terminate>>,
    worker: Option<JoinHandle<()>>,
}

impl Client {
    /// Create a new client with a custom transport
    ///
    /// ```
    /// use transport::{Client, Command, io::InMemoryTransport};
    ///
    /// let (client_transport, _debugger_transport) = InMemoryTransport::pair();
    /// let (tx, _rx) = crossbeam_channel::unbounded();
    /// let client = Client::with_transport(client_transport, tx)?;
    /// client.enqueue(Command::new("info").with_parameters("locals"))?;
    /// # Ok::<(), eyre::Error>(())
    /// ```
    pub fn with_transport<T>(transport: T, events: Sender<Event>) -> Result<Self>
    where
        T: DebuggerTransport,
    {
        let (input, output, terminator) = transport.split()?;
        let queue = Arc::new(CommandQueue::new());

        let worker = {
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name("debugger-worker".to_string())
                .spawn(move || {
                    let worker = Worker {
                        reader: HandWrittenReader::new(input),
                        writer: Box::new(output),
                        parser: ProtocolParser::new(),
                        queue,
                        events,
                    };
                    worker.run();
                })
                .wrap_err("spawning debugger worker")?
        };

        Ok(Self {
            queue,
            terminator: Some(terminator),
            worker: Some(worker),
        })
    }

    /// Append a command to the queue.
    ///
    /// Fails once the debugger has exited or the client has been stopped.
    #[tracing::instrument(skip(self, command), fields(command = %command), level = "debug")]
    pub fn enqueue(&self, command: Command) -> Result<()> {
        self.queue.push(command)
    }

    /// Whether the debugger is currently busy with a command
    pub fn command_in_flight(&self) -> bool {
        self.queue.in_flight()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// `false` once the debugger has exited or [`Client::stop`] was called
    pub fn is_running(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Discard queued commands, terminate the debugger and wait for the worker.
    ///
    /// No events are sent once this has been called, not even for the
    /// command in flight.
    pub fn stop(&mut self) -> Result<()> {
        let dropped = self.queue.stop();
        if dropped > 0 {
            tracing::debug!(dropped, "discarding queued commands");
        }

        if let Some(mut terminator) = self.terminator.take() {
            terminator.terminate().wrap_err("terminating debugger")?;
        }

        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| eyre::eyre!("debugger worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        tracing::debug!("shutting down client");
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "stopping client");
        }
    }
}

struct Worker<I> {
    reader: HandWrittenReader<I>,
    writer: Box<dyn Write + Send>,
    parser: ProtocolParser,
    queue: Arc<CommandQueue>,
    events: Sender<Event>,
}

enum Progress {
    Completed,
    Exited,
}

impl<I> Worker<I>
where
    I: Read,
{
    fn forward(&self, event: Event) {
        let sent = self.queue.unless_stopped(|| {
            if self.events.send(event).is_err() {
                tracing::trace!("event receiver dropped");
            }
        });
        if !sent {
            tracing::trace!("client stopped, dropping event");
        }
    }

    fn run(mut self) {
        loop {
            match self.read_until_prompt() {
                Progress::Completed => {}
                Progress::Exited => return,
            }

            if let Some(finished) = self.queue.complete() {
                if finished.update_watch {
                    let refresh = Command::new("display");
                    if let Err(e) = self.queue.push_front(refresh) {
                        tracing::debug!(error = %e, "skipping watch refresh");
                    }
                }
            }

            let Some(command) = self.queue.next() else {
                tracing::debug!("command queue closed, stopping worker");
                return;
            };

            if let Err(e) = self.send(&command) {
                tracing::warn!(error = %e, command = %command, "writing command");
                self.queue.close();
                self.forward(Event::ProcessExited);
                return;
            }
        }
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        tracing::debug!(command = %command, "sending command");
        self.parser.set_current(command.clone());
        writeln!(self.writer, "{}", command.line()).wrap_err("writing command")?;
        self.writer.flush().wrap_err("flushing command")?;
        Ok(())
    }

    fn read_until_prompt(&mut self) -> Progress {
        loop {
            let line = match self.reader.poll_line() {
                Ok(Some(line)) => line,
                Ok(None) => return self.exited(),
                Err(e) => {
                    tracing::warn!(error = %e, "reading debugger output");
                    return self.exited();
                }
            };

            let mut completed = false;
            for event in self.parser.on_line(line) {
                completed |= matches!(event, Event::CommandCompleted(_));
                self.forward(event);
            }
            if completed {
                return Progress::Completed;
            }
        }
    }

    fn exited(&mut self) -> Progress {
        tracing::debug!("debugger output ended");
        self.queue.close();
        if self.queue.is_stopped() {
            tracing::debug!("output ended after stop, nothing to report");
            return Progress::Exited;
        }
        for event in self.parser.finish() {
            self.forward(event);
        }
        Progress::Exited
    }
}
