//! Testing utilities
//!
//! [`MockDebugger`] plays the debugger's side of an [`InMemoryTransport`]:
//! it records the command lines the client writes and emits annotated
//! output on request, so sessions can be driven without a real GDB.

use std::io::{BufRead, BufReader, Write};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use eyre::WrapErr;

use crate::ANNOTATION_MARKER;
use crate::io::{DebuggerTransport, InMemoryTransport, InMemoryWriter, Terminate};

/// How long [`MockDebugger::expect_command`] waits by default
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockDebugger {
    writer: Option<InMemoryWriter>,
    commands: Receiver<String>,
    _terminator: Box<dyn Terminate>,
}

impl MockDebugger {
    /// A connected `(client_transport, debugger)` pair
    pub fn pair() -> eyre::Result<(InMemoryTransport, Self)> {
        let (client, debugger) = InMemoryTransport::pair();
        Ok((client, Self::new(debugger)?))
    }

    pub fn new(transport: InMemoryTransport) -> eyre::Result<Self> {
        let (reader, writer, terminator) = transport.split()?;
        let (tx, commands) = crossbeam_channel::unbounded();

        thread::Builder::new()
            .name("mock-debugger".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(reader);
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {
                            let line = line.trim_end().to_string();
                            tracing::debug!(%line, "mock debugger received command");
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    }
                }
            })
            .wrap_err("spawning mock debugger reader")?;

        Ok(Self {
            writer: Some(writer),
            commands,
            _terminator: terminator,
        })
    }

    /// Wait for the next command line written by the client
    pub fn expect_command(&self) -> eyre::Result<String> {
        self.expect_command_within(COMMAND_TIMEOUT)
    }

    pub fn expect_command_within(&self, timeout: Duration) -> eyre::Result<String> {
        match self.commands.recv_timeout(timeout) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => eyre::bail!("no command within {timeout:?}"),
            Err(RecvTimeoutError::Disconnected) => eyre::bail!("client disconnected"),
        }
    }

    /// A command that has already been written, if any
    pub fn try_command(&self) -> Option<String> {
        self.commands.try_recv().ok()
    }

    /// Write raw output, exactly as given
    pub fn send_raw(&mut self, text: &str) -> eyre::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| eyre::eyre!("mock debugger has hung up"))?;
        writer
            .write_all(text.as_bytes())
            .wrap_err("writing mock output")?;
        Ok(())
    }

    pub fn text(&mut self, line: &str) -> eyre::Result<()> {
        self.send_raw(&format!("{line}\n"))
    }

    pub fn annotation(&mut self, name: &str) -> eyre::Result<()> {
        self.send_raw(&format!("\n{ANNOTATION_MARKER}{name}\n"))
    }

    pub fn annotation_with(&mut self, name: &str, params: &str) -> eyre::Result<()> {
        self.send_raw(&format!("\n{ANNOTATION_MARKER}{name} {params}\n"))
    }

    /// The prompt that ends every command's output
    pub fn prompt(&mut self) -> eyre::Result<()> {
        self.annotation("pre-prompt")?;
        self.send_raw("(gdb) ")?;
        self.annotation("prompt")
    }

    pub fn post_prompt(&mut self) -> eyre::Result<()> {
        self.annotation("post-prompt")
    }

    /// Answer the next command with plain output followed by a prompt
    pub fn respond(&mut self, lines: &[&str]) -> eyre::Result<String> {
        let command = self.expect_command()?;
        self.post_prompt()?;
        for line in lines {
            self.text(line)?;
        }
        self.prompt()?;
        Ok(command)
    }

    pub fn frame(&mut self, level: usize, function: &str, file: &str, line: usize) -> eyre::Result<()> {
        self.annotation_with("frame-begin", &format!("{level} 0x401136"))?;
        self.annotation("frame-function-name")?;
        self.send_raw(function)?;
        self.annotation("frame-args")?;
        self.send_raw(" ()")?;
        self.annotation("frame-source-begin")?;
        self.send_raw(" at ")?;
        self.annotation("frame-source-file")?;
        self.send_raw(file)?;
        self.annotation("frame-source-file-end")?;
        self.send_raw(":")?;
        self.annotation("frame-source-line")?;
        self.send_raw(&line.to_string())?;
        self.annotation("frame-source-end")?;
        self.annotation("frame-end")
    }

    pub fn source(&mut self, path: &str, line: usize) -> eyre::Result<()> {
        self.annotation_with("source", &format!("{path}:{line}:1:beg:0x401136"))
    }

    fn display_header(&mut self, slot: u32, expression: &str) -> eyre::Result<()> {
        self.annotation("display-begin")?;
        self.send_raw(&slot.to_string())?;
        self.annotation("display-number-end")?;
        self.send_raw(": ")?;
        self.annotation("display-expression")?;
        self.send_raw(expression)?;
        self.annotation("display-expression-end")?;
        self.send_raw(" = ")?;
        self.annotation("display-value")
    }

    pub fn display(&mut self, slot: u32, expression: &str, value: &str) -> eyre::Result<()> {
        self.display_header(slot, expression)?;
        self.send_raw(value)?;
        self.annotation("display-end")
    }

    /// A display whose value is a struct of scalar fields
    pub fn display_struct(
        &mut self,
        slot: u32,
        expression: &str,
        fields: &[(&str, &str)],
    ) -> eyre::Result<()> {
        self.display_header(slot, expression)?;
        self.send_raw("{")?;
        for (i, (name, value)) in fields.iter().enumerate() {
            if i > 0 {
                self.send_raw(", ")?;
            }
            self.annotation("field-begin")?;
            self.send_raw(name)?;
            self.annotation("field-name-end")?;
            self.send_raw(" = ")?;
            self.annotation("field-value")?;
            self.send_raw(value)?;
            self.annotation("field-end")?;
        }
        self.send_raw("}")?;
        self.annotation("display-end")
    }

    pub fn value_history(&mut self, index: usize, value: &str) -> eyre::Result<()> {
        self.annotation_with("value-history-begin", &format!("{index} -"))?;
        self.send_raw(&format!("${index} = "))?;
        self.annotation("value-history-value")?;
        self.send_raw(value)?;
        self.annotation("value-history-end")
    }

    pub fn error(&mut self, message: &str) -> eyre::Result<()> {
        self.annotation("error-begin")?;
        self.send_raw(message)?;
        self.annotation("error")
    }

    pub fn signal(&mut self, name: &str, description: &str) -> eyre::Result<()> {
        self.send_raw("\nProgram received signal ")?;
        self.annotation("signal")?;
        self.annotation("signal-name")?;
        self.send_raw(name)?;
        self.annotation("signal-name-end")?;
        self.send_raw(", ")?;
        self.annotation("signal-string")?;
        self.send_raw(description)?;
        self.annotation("signal-string-end")?;
        self.text(".")
    }

    pub fn exited(&mut self, code: i32) -> eyre::Result<()> {
        self.annotation_with("exited", &code.to_string())
    }

    /// Close the output stream, as if the debugger process died
    pub fn hang_up(&mut self) {
        self.writer.take();
    }
}
