use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use eyre::WrapErr;
use server::GdbConfig;
use transport::events::{Register, StackFrame};
use transport::{Client, Command, DebuggerTransport};

use crate::breakpoints::Breakpoints;
use crate::internals::DebuggerInternals;
use crate::state::DebuggerState;
use crate::types::{Breakpoint, BreakpointIndex, Location, SourceEdit};
use crate::watches::{WatchId, Watches};
use crate::Event;

/// Sent once the debugger is up, before anything the caller queues
const SETUP_COMMANDS: &[(&str, &str)] = &[
    ("set", "confirm off"),
    ("set", "width 0"),
    ("set", "height 0"),
    ("set", "print pretty off"),
];

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Represents a debugging session
///
/// Events from the debugger are handled on the caller's thread: call
/// [`Debugger::pump`] or [`Debugger::pump_timeout`] regularly, and
/// notifications are sent to the channel given at construction.
pub struct Debugger {
    internals: DebuggerInternals,
    events: Receiver<transport::events::Event>,
    edits: Receiver<SourceEdit>,
}

impl Debugger {
    /// Start GDB for the given configuration
    #[tracing::instrument(skip(config, notifications, edits))]
    pub fn spawn(
        config: &GdbConfig,
        notifications: Sender<Event>,
        edits: Receiver<SourceEdit>,
    ) -> eyre::Result<Self> {
        let transport = server::spawn(config).wrap_err("starting debugger process")?;
        Self::with_transport(transport, notifications, edits)
    }

    /// Run a session over an existing transport
    pub fn with_transport<T>(
        transport: T,
        notifications: Sender<Event>,
        edits: Receiver<SourceEdit>,
    ) -> eyre::Result<Self>
    where
        T: DebuggerTransport,
    {
        let (tx, events) = crossbeam_channel::unbounded();
        let client = Client::with_transport(transport, tx).wrap_err("creating debugger client")?;
        let internals = DebuggerInternals::new(client, notifications);
        for (text, parameters) in SETUP_COMMANDS {
            internals
                .send(Command::new(*text).with_parameters(*parameters))
                .wrap_err("queueing setup commands")?;
        }

        Ok(Self {
            internals,
            events,
            edits,
        })
    }

    /// Handle everything that has arrived without blocking.
    ///
    /// Returns the number of messages handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(edit) = self.next_edit() {
            self.internals.apply_edit(edit);
            handled += 1;
        }
        while let Some(event) = self.next_event() {
            self.internals.on_event(event);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for something to arrive, then handle everything pending
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        let (event, edit) = crossbeam_channel::select! {
            recv(self.events) -> msg => (Some(msg), None),
            recv(self.edits) -> msg => (None, Some(msg)),
            default(timeout) => (None, None),
        };

        let mut handled = 0;
        match event {
            Some(Ok(event)) => {
                self.internals.on_event(event);
                handled += 1;
            }
            Some(Err(_)) => self.events = crossbeam_channel::never(),
            None => {}
        }
        match edit {
            Some(Ok(edit)) => {
                self.internals.apply_edit(edit);
                handled += 1;
            }
            Some(Err(_)) => self.edits = crossbeam_channel::never(),
            None => {}
        }
        handled + self.pump()
    }

    /// Pump until `pred` holds
    pub fn wait_until<F>(&mut self, timeout: Duration, mut pred: F) -> eyre::Result<()>
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(self) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                eyre::bail!("timed out after {timeout:?}");
            }
            self.pump_timeout((deadline - now).min(POLL_INTERVAL));
        }
    }

    fn next_event(&mut self) -> Option<transport::events::Event> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                self.events = crossbeam_channel::never();
                None
            }
        }
    }

    fn next_edit(&mut self) -> Option<SourceEdit> {
        match self.edits.try_recv() {
            Ok(edit) => Some(edit),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                self.edits = crossbeam_channel::never();
                None
            }
        }
    }

    /// Stop the debugger process. No events are handled afterwards.
    ///
    /// Output of the command in flight is discarded; the breakpoint and watch
    /// containers stay usable.
    #[tracing::instrument(skip(self))]
    pub fn stop(&mut self) -> eyre::Result<()> {
        self.internals.client.stop().wrap_err("stopping debugger client")?;
        self.internals.state = DebuggerState::Ended;
        self.events = crossbeam_channel::never();
        self.internals.discard_in_flight("debugger stopped");
        Ok(())
    }

    // execution

    /// Run a line typed into the debug console
    #[tracing::instrument(skip(self))]
    pub fn console(&mut self, line: &str) -> eyre::Result<()> {
        eyre::ensure!(!line.trim().is_empty(), "empty command");
        self.internals.execute(Command::console(line))
    }

    fn exec(&mut self, text: &str) -> eyre::Result<()> {
        self.internals
            .execute(Command::new(text).updating_watches(true))
            .wrap_err_with(|| format!("sending {text}"))
    }

    /// Start the debugee
    pub fn run(&mut self) -> eyre::Result<()> {
        self.exec("run")
    }

    /// Resume execution of the debugee
    pub fn r#continue(&mut self) -> eyre::Result<()> {
        self.exec("continue")
    }

    /// Step over a statement
    pub fn next(&mut self) -> eyre::Result<()> {
        self.exec("next")
    }

    /// Step into a statement
    pub fn step(&mut self) -> eyre::Result<()> {
        self.exec("step")
    }

    /// Run until the current function returns
    pub fn finish(&mut self) -> eyre::Result<()> {
        self.exec("finish")
    }

    pub fn kill(&mut self) -> eyre::Result<()> {
        self.internals.execute(Command::new("kill"))
    }

    /// Ask for the backtrace, locals, arguments, registers and disassembly
    pub fn update_debug_info(&mut self) -> eyre::Result<()> {
        self.internals.update_debug_info()
    }

    /// Evaluate an expression in the selected frame.
    ///
    /// The receiver yields the printed value, or GDB's error message.
    #[tracing::instrument(skip(self))]
    pub fn evaluate(
        &mut self,
        expression: &str,
    ) -> eyre::Result<oneshot::Receiver<Result<String, String>>> {
        self.internals.evaluate(expression)
    }

    /// Evaluate an expression, pumping events until the result arrives
    pub fn evaluate_blocking(&mut self, expression: &str, timeout: Duration) -> eyre::Result<String> {
        let rx = self.evaluate(expression)?;
        let deadline = Instant::now() + timeout;
        loop {
            match rx.try_recv() {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(message)) => eyre::bail!("evaluating {expression}: {message}"),
                Err(oneshot::TryRecvError::Disconnected) => {
                    eyre::bail!("evaluation of {expression} was abandoned")
                }
                Err(oneshot::TryRecvError::Empty) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                eyre::bail!("timed out evaluating {expression}");
            }
            self.pump_timeout((deadline - now).min(POLL_INTERVAL));
        }
    }

    /// Dump `count` bytes from `address`
    pub fn examine_memory(&mut self, address: &str, count: usize) -> eyre::Result<()> {
        eyre::ensure!(count > 0, "nothing to examine");
        self.internals.send(
            Command::new(format!("x/{count}xb")).with_parameters(address.trim()),
        )
    }

    /// Change the current scope to another stack frame
    pub fn select_frame(&mut self, level: usize) -> eyre::Result<()> {
        self.internals.select_frame(level)
    }

    // breakpoints

    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) -> eyre::Result<BreakpointIndex> {
        self.internals.add_breakpoint(breakpoint)
    }

    pub fn remove_breakpoint(&mut self, index: BreakpointIndex) -> eyre::Result<Breakpoint> {
        self.internals.remove_breakpoint(index)
    }

    pub fn remove_breakpoint_at(&mut self, path: &Path, line: usize) -> eyre::Result<Breakpoint> {
        let (index, _) = self
            .internals
            .breakpoints
            .at(path, line)
            .ok_or_else(|| eyre::eyre!("no breakpoint at {}:{line}", path.display()))?;
        self.internals.remove_breakpoint(index)
    }

    pub fn set_breakpoint_condition(
        &mut self,
        index: BreakpointIndex,
        condition: Option<String>,
    ) -> eyre::Result<()> {
        self.internals.set_breakpoint_condition(index, condition)
    }

    pub fn set_breakpoint_enabled(&mut self, index: BreakpointIndex, enabled: bool) -> eyre::Result<()> {
        self.internals.set_breakpoint_enabled(index, enabled)
    }

    /// Register every breakpoint in the list with the debugger, e.g. after
    /// restoring a saved session
    pub fn send_all_breakpoints(&mut self) -> eyre::Result<()> {
        self.internals.send_all_breakpoints()
    }

    // watches

    pub fn add_watch(&mut self, expression: &str) -> eyre::Result<WatchId> {
        self.internals.add_watch(expression)
    }

    /// Returns whether a watch was removed
    pub fn remove_watch(&mut self, expression: &str) -> bool {
        self.internals.remove_watch(expression)
    }

    pub fn remove_watch_by_slot(&mut self, slot: u32) -> bool {
        self.internals.remove_watch_by_slot(slot)
    }

    pub fn rename_watch(&mut self, id: WatchId, expression: &str) -> eyre::Result<()> {
        self.internals.rename_watch(id, expression)
    }

    pub fn clear_watches(&mut self) {
        self.internals.clear_watches()
    }

    pub fn send_all_watches(&mut self) -> eyre::Result<()> {
        self.internals.send_all_watches()
    }

    /// Forget display slots and values so watches can be registered again
    pub fn invalidate_watches(&mut self) {
        self.internals.invalidate_watches()
    }

    /// Re-print every watch
    pub fn refresh_watches(&mut self) -> eyre::Result<()> {
        self.internals.send(Command::new("display"))
    }

    // edits

    pub fn on_lines_inserted(&mut self, path: &Path, start_line: usize, count: usize) {
        self.internals.apply_edit(SourceEdit::LinesInserted {
            path: path.to_path_buf(),
            start_line,
            count,
        });
    }

    pub fn on_lines_deleted(&mut self, path: &Path, start_line: usize, count: usize) {
        self.internals.apply_edit(SourceEdit::LinesDeleted {
            path: path.to_path_buf(),
            start_line,
            count,
        });
    }

    pub fn on_file_removed(&mut self, path: &Path) {
        self.internals.apply_edit(SourceEdit::FileRemoved {
            path: path.to_path_buf(),
        });
    }

    // state

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.internals.breakpoints
    }

    pub fn watches(&self) -> &Watches {
        &self.internals.watches
    }

    pub fn backtrace(&self) -> &[StackFrame] {
        &self.internals.backtrace
    }

    pub fn selected_frame(&self) -> Option<&StackFrame> {
        self.internals
            .selected_frame
            .and_then(|level| self.internals.backtrace.get(level))
    }

    pub fn registers(&self) -> &[Register] {
        &self.internals.registers
    }

    pub fn locals(&self) -> &[String] {
        &self.internals.locals
    }

    pub fn params(&self) -> &[String] {
        &self.internals.params
    }

    pub fn disassembly(&self) -> &[String] {
        &self.internals.disassembly
    }

    pub fn memory(&self) -> &[String] {
        &self.internals.memory
    }

    /// Where the debugee last stopped
    pub fn location(&self) -> Option<&Location> {
        self.internals.location.as_ref()
    }

    /// Whether the first prompt has been seen
    pub fn is_ready(&self) -> bool {
        self.internals.state != DebuggerState::Starting
    }

    /// Whether the debugee is executing
    pub fn is_running(&self) -> bool {
        self.internals.state == DebuggerState::Running
    }

    pub fn has_exited(&self) -> bool {
        !self.internals.is_alive()
    }

    pub fn command_in_flight(&self) -> bool {
        self.internals.client.command_in_flight()
    }
}
