use std::collections::VecDeque;

use crossbeam_channel::Sender;
use eyre::WrapErr;
use transport::events::{Completion, Register, StackFrame};
use transport::{Client, Command, CommandOrigin};

use crate::breakpoints::{Breakpoints, EditOutcome};
use crate::state::DebuggerState;
use crate::types::{Breakpoint, BreakpointIndex, Location, SourceEdit};
use crate::watches::{WatchId, Watches};
use crate::Event;

pub(crate) type EvaluationSender = oneshot::Sender<Result<String, String>>;

/// Commands that resume the debugee
const EXEC_COMMANDS: &[&str] = &[
    "run", "r", "start", "continue", "c", "next", "n", "step", "s", "finish", "fin", "until",
    "u", "advance", "jump",
];

/// Commands that print a frame without changing the backtrace
const FRAME_COMMANDS: &[&str] = &["frame", "f", "up", "down"];

fn is_exec(command: &Command) -> bool {
    EXEC_COMMANDS.contains(&command.text.as_str())
}

/// Parse `Breakpoint 3 at 0x1149: file main.c, line 5.`
fn parse_breakpoint_number(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Breakpoint ")?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    })
}

fn removal_command(number: Option<u32>, location: String) -> Command {
    match number {
        Some(number) => Command::new("delete").with_parameters(number.to_string()),
        None => Command::new("clear").with_parameters(location),
    }
}

pub(crate) struct DebuggerInternals {
    pub(crate) client: Client,
    publisher: Sender<Event>,
    pub(crate) state: DebuggerState,

    pub(crate) breakpoints: Breakpoints,
    pub(crate) watches: Watches,
    pub(crate) backtrace: Vec<StackFrame>,
    pub(crate) selected_frame: Option<usize>,
    pub(crate) registers: Vec<Register>,
    pub(crate) locals: Vec<String>,
    pub(crate) params: Vec<String>,
    pub(crate) disassembly: Vec<String>,
    pub(crate) memory: Vec<String>,
    pub(crate) location: Option<Location>,

    /// Frames printed by the command in flight, applied when it completes
    staged_frames: Option<Vec<StackFrame>>,
    last_evaluation: Option<String>,
    /// One sender per internal `print` in the queue, in queue order
    pending_evaluations: VecDeque<EvaluationSender>,
    /// A source location was printed by the command in flight
    saw_source: bool,
}

impl DebuggerInternals {
    pub(crate) fn new(client: Client, publisher: Sender<Event>) -> Self {
        Self {
            client,
            publisher,
            state: DebuggerState::Starting,
            breakpoints: Breakpoints::new(),
            watches: Watches::new(),
            backtrace: Vec::new(),
            selected_frame: None,
            registers: Vec::new(),
            locals: Vec::new(),
            params: Vec::new(),
            disassembly: Vec::new(),
            memory: Vec::new(),
            location: None,
            staged_frames: None,
            last_evaluation: None,
            pending_evaluations: VecDeque::new(),
            saw_source: false,
        }
    }

    #[tracing::instrument(skip(self, event), level = "debug")]
    pub(crate) fn on_event(&mut self, event: transport::events::Event) {
        use transport::events::Event as E;

        tracing::trace!(?event, "handling event");
        match event {
            E::Backtrace(frames) => {
                self.staged_frames
                    .get_or_insert_with(Vec::new)
                    .extend(frames);
            }
            E::Watches(displays) => {
                self.watches.begin_update();
                for display in &displays {
                    self.watches.apply_display(display);
                }
                self.finish_watch_batch();
            }
            E::Registers(registers) => {
                self.registers = registers;
                self.publish(Event::RegistersChanged);
            }
            E::Locals(lines) => {
                self.locals = lines.clone();
                self.publish(Event::LocalsReady(lines));
            }
            E::Params(lines) => {
                self.params = lines.clone();
                self.publish(Event::ParamsReady(lines));
            }
            E::Disassembly(lines) => {
                self.disassembly = lines.clone();
                self.publish(Event::DisassemblyReady(lines));
            }
            E::Memory(lines) => {
                self.memory = lines.clone();
                self.publish(Event::MemoryReady(lines));
            }
            E::Evaluation(text) => {
                self.last_evaluation = Some(text.clone());
                self.publish(Event::EvaluationReady(text));
            }
            E::Source { path, line } => {
                let location = Location { path, line };
                self.location = Some(location.clone());
                self.saw_source = true;
                self.publish(Event::LocationChanged(location));
            }
            E::Signal(signal) => {
                tracing::debug!(signal = %signal.name, "debugee stopped by signal");
                self.publish(Event::Stopped(signal));
            }
            E::Exited(code) => {
                tracing::debug!(%code, "debugee exited");
                self.state = DebuggerState::Ready;
                self.location = None;
                if !self.backtrace.is_empty() {
                    self.backtrace.clear();
                    self.selected_frame = None;
                    self.publish(Event::BacktraceChanged);
                }
                self.publish(Event::ProgramExited(code));
            }
            E::CommandCompleted(completion) => self.on_completed(completion),
            E::ProcessExited => self.on_process_exited(),
        }
    }

    fn on_completed(&mut self, completion: Completion) {
        let Completion {
            command,
            output,
            error,
        } = completion;

        if self.state == DebuggerState::Starting {
            tracing::debug!("debugger ready");
            self.state = DebuggerState::Ready;
        }

        let frames = self.staged_frames.take();
        let saw_source = std::mem::take(&mut self.saw_source);
        let evaluation = self.last_evaluation.take();

        let Some(command) = command else {
            if let Some(frames) = frames {
                self.replace_backtrace(frames);
            }
            return;
        };

        if let Some(frames) = frames {
            if FRAME_COMMANDS.contains(&command.text.as_str()) {
                tracing::trace!("frame selection, keeping backtrace");
            } else {
                self.replace_backtrace(frames);
            }
        }

        if command.is("print") && command.origin == CommandOrigin::Internal {
            if let Some(tx) = self.pending_evaluations.pop_front() {
                let result = match (&error, evaluation) {
                    (Some(error), _) => Err(error.clone()),
                    (None, Some(value)) => Ok(value),
                    (None, None) => Err(format!("{command} printed no value")),
                };
                // the caller may have given up waiting
                let _ = tx.send(result);
            }
        }

        if is_exec(&command) && self.state == DebuggerState::Running {
            self.state = DebuggerState::Ready;
        }

        if let Some(error) = error {
            tracing::debug!(%command, %error, "command failed");
            self.publish(Event::CommandFailed(error));
            return;
        }

        if command.echo_to_console && !output.trim().is_empty() {
            self.publish(Event::ConsoleOutput(output.clone()));
        }

        if command.is("break") || command.is("b") {
            self.on_breakpoint_created(&command, &output);
        }

        if is_exec(&command) && saw_source {
            if let Err(e) = self.update_debug_info() {
                tracing::warn!(error = %e, "could not refresh debug information");
            }
        }
    }

    fn on_breakpoint_created(&mut self, command: &Command, output: &str) {
        let Some(number) = parse_breakpoint_number(output) else {
            tracing::debug!(%output, "no breakpoint number in output");
            return;
        };
        let Some(breakpoint) = self
            .breakpoints
            .iter()
            .find(|b| b.location() == command.parameters)
            .cloned()
        else {
            tracing::debug!(%number, location = %command.parameters, "breakpoint not in list");
            return;
        };

        self.breakpoints
            .assign_number(&breakpoint.path, breakpoint.line, number);
        if let Some(condition) = &breakpoint.condition {
            self.send_logged(
                Command::new("condition").with_parameters(format!("{number} {condition}")),
            );
        }
        if !breakpoint.enabled {
            self.send_logged(Command::new("disable").with_parameters(number.to_string()));
        }
        self.publish(Event::BreakpointsChanged);
    }

    fn on_process_exited(&mut self) {
        tracing::debug!("debugger process exited");
        self.state = DebuggerState::Ended;
        self.discard_in_flight("debugger process exited");
        self.publish(Event::ProcessExited);
    }

    /// Forget everything that was waiting on the debugger's output
    pub(crate) fn discard_in_flight(&mut self, reason: &str) {
        if let Some(batch) = self.watches.abort_update() {
            self.publish(Event::WatchesChanged(batch));
        }
        if let Some(frames) = self.staged_frames.take() {
            tracing::debug!(frames = frames.len(), "dropping staged frames");
        }
        self.last_evaluation = None;
        self.saw_source = false;
        for tx in self.pending_evaluations.drain(..) {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    fn replace_backtrace(&mut self, frames: Vec<StackFrame>) {
        self.selected_frame = (!frames.is_empty()).then_some(0);
        self.backtrace = frames;
        self.publish(Event::BacktraceChanged);
    }

    fn finish_watch_batch(&mut self) {
        if let Some(batch) = self.watches.end_update() {
            self.publish(Event::WatchesChanged(batch));
        }
    }

    pub(crate) fn publish(&self, event: Event) {
        tracing::trace!(?event, "publishing event");
        if self.publisher.send(event).is_err() {
            tracing::trace!("no subscriber for debugger events");
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state != DebuggerState::Ended
    }

    pub(crate) fn send(&self, command: Command) -> eyre::Result<()> {
        eyre::ensure!(self.is_alive(), "the debugger process has exited");
        self.client
            .enqueue(command)
            .wrap_err("queueing debugger command")
    }

    /// Send a command the caller cannot act on failing
    fn send_logged(&self, command: Command) {
        if !self.is_alive() {
            return;
        }
        if let Err(e) = self.client.enqueue(command) {
            tracing::warn!(error = %e, "could not queue command");
        }
    }

    // execution

    pub(crate) fn execute(&mut self, command: Command) -> eyre::Result<()> {
        let resumes = is_exec(&command);
        self.send(command)?;
        if resumes {
            self.state = DebuggerState::Running;
        }
        Ok(())
    }

    pub(crate) fn update_debug_info(&self) -> eyre::Result<()> {
        for (text, parameters) in [
            ("backtrace", ""),
            ("info", "locals"),
            ("info", "args"),
            ("info", "registers"),
            ("disas", ""),
        ] {
            self.send(Command::new(text).with_parameters(parameters))?;
        }
        Ok(())
    }

    pub(crate) fn evaluate(
        &mut self,
        expression: &str,
    ) -> eyre::Result<oneshot::Receiver<Result<String, String>>> {
        let expression = expression.trim();
        eyre::ensure!(!expression.is_empty(), "nothing to evaluate");
        let (tx, rx) = oneshot::channel();
        self.send(Command::new("print").with_parameters(expression))?;
        self.pending_evaluations.push_back(tx);
        Ok(rx)
    }

    pub(crate) fn select_frame(&mut self, level: usize) -> eyre::Result<()> {
        eyre::ensure!(
            level < self.backtrace.len(),
            "no frame {level} (backtrace has {})",
            self.backtrace.len()
        );
        self.send(Command::new("frame").with_parameters(level.to_string()))?;
        self.send(Command::new("info").with_parameters("locals"))?;
        self.send(Command::new("info").with_parameters("args"))?;
        self.selected_frame = Some(level);
        self.publish(Event::BacktraceChanged);
        Ok(())
    }

    // breakpoints

    pub(crate) fn add_breakpoint(&mut self, breakpoint: Breakpoint) -> eyre::Result<BreakpointIndex> {
        let location = breakpoint.location();
        let index = self.breakpoints.add(breakpoint)?;
        self.publish(Event::BreakpointsChanged);
        self.send_logged(Command::new("break").with_parameters(location));
        Ok(index)
    }

    pub(crate) fn remove_breakpoint(&mut self, index: BreakpointIndex) -> eyre::Result<Breakpoint> {
        let breakpoint = self
            .breakpoints
            .remove(index)
            .ok_or_else(|| eyre::eyre!("no breakpoint {index}"))?;
        self.publish(Event::BreakpointsChanged);
        self.send_logged(removal_command(breakpoint.number, breakpoint.location()));
        Ok(breakpoint)
    }

    pub(crate) fn set_breakpoint_condition(
        &mut self,
        index: BreakpointIndex,
        condition: Option<String>,
    ) -> eyre::Result<()> {
        let breakpoint = self.breakpoints.set_condition(index, condition)?.clone();
        self.publish(Event::BreakpointsChanged);
        // unnumbered breakpoints get their condition once `break` completes
        if let Some(number) = breakpoint.number {
            let parameters = match &breakpoint.condition {
                Some(condition) => format!("{number} {condition}"),
                None => number.to_string(),
            };
            self.send_logged(Command::new("condition").with_parameters(parameters));
        }
        Ok(())
    }

    pub(crate) fn set_breakpoint_enabled(
        &mut self,
        index: BreakpointIndex,
        enabled: bool,
    ) -> eyre::Result<()> {
        let breakpoint = self.breakpoints.set_enabled(index, enabled)?.clone();
        self.publish(Event::BreakpointsChanged);
        if let Some(number) = breakpoint.number {
            let text = if enabled { "enable" } else { "disable" };
            self.send_logged(Command::new(text).with_parameters(number.to_string()));
        }
        Ok(())
    }

    /// Register every breakpoint with a fresh session
    pub(crate) fn send_all_breakpoints(&mut self) -> eyre::Result<()> {
        self.breakpoints.clear_numbers();
        let locations: Vec<String> = self.breakpoints.iter().map(Breakpoint::location).collect();
        for location in locations {
            self.send(Command::new("break").with_parameters(location))?;
        }
        Ok(())
    }

    pub(crate) fn apply_edit(&mut self, edit: SourceEdit) {
        tracing::debug!(?edit, "applying source edit");
        let outcome = match edit {
            SourceEdit::LinesInserted {
                path,
                start_line,
                count,
            } => self.breakpoints.on_lines_inserted(&path, start_line, count),
            SourceEdit::LinesDeleted {
                path,
                start_line,
                count,
            } => self.breakpoints.on_lines_deleted(&path, start_line, count),
            SourceEdit::FileRemoved { path } => EditOutcome {
                moved: Vec::new(),
                removed: self.breakpoints.remove_for_file(&path),
            },
        };
        self.after_edit(outcome);
    }

    fn after_edit(&mut self, outcome: EditOutcome) {
        if outcome.is_empty() {
            return;
        }
        self.publish(Event::BreakpointsChanged);

        for breakpoint in &outcome.removed {
            self.send_logged(removal_command(breakpoint.number, breakpoint.location()));
        }
        for (old_line, breakpoint) in &outcome.moved {
            let old = Breakpoint {
                line: *old_line,
                ..breakpoint.clone()
            };
            let number = self
                .breakpoints
                .take_number(&breakpoint.path, breakpoint.line);
            self.send_logged(removal_command(number, old.location()));
            self.send_logged(Command::new("break").with_parameters(breakpoint.location()));
        }
    }

    // watches

    pub(crate) fn add_watch(&mut self, expression: &str) -> eyre::Result<WatchId> {
        self.watches.begin_update();
        let added = self.watches.add(expression);
        self.finish_watch_batch();
        let id = added?;
        self.send_logged(Command::new("display").with_parameters(expression.trim()));
        Ok(id)
    }

    pub(crate) fn remove_watch(&mut self, expression: &str) -> bool {
        self.watches.begin_update();
        let removed = self.watches.remove(expression);
        self.finish_watch_batch();
        let Some(removed) = removed else {
            return false;
        };
        if let Some(slot) = removed.slot {
            self.send_logged(Command::new("undisplay").with_parameters(slot.to_string()));
        }
        true
    }

    pub(crate) fn remove_watch_by_slot(&mut self, slot: u32) -> bool {
        self.watches.begin_update();
        let removed = self.watches.remove_by_slot(slot);
        self.finish_watch_batch();
        if removed.is_some() {
            self.send_logged(Command::new("undisplay").with_parameters(slot.to_string()));
        }
        removed.is_some()
    }

    pub(crate) fn rename_watch(&mut self, id: WatchId, expression: &str) -> eyre::Result<()> {
        self.watches.begin_update();
        let renamed = self.watches.rename(id, expression);
        self.finish_watch_batch();
        if let Some(slot) = renamed? {
            self.send_logged(Command::new("undisplay").with_parameters(slot.to_string()));
        }
        self.send_logged(Command::new("display").with_parameters(expression.trim()));
        Ok(())
    }

    pub(crate) fn clear_watches(&mut self) {
        self.watches.begin_update();
        let slots = self.watches.clear();
        self.finish_watch_batch();
        for slot in slots {
            self.send_logged(Command::new("undisplay").with_parameters(slot.to_string()));
        }
    }

    /// Register every watch without a display slot
    pub(crate) fn send_all_watches(&mut self) -> eyre::Result<()> {
        for expression in self.watches.unregistered() {
            self.watches.request_evaluation(&expression);
            self.send(Command::new("display").with_parameters(expression))?;
        }
        Ok(())
    }

    pub(crate) fn invalidate_watches(&mut self) {
        self.watches.begin_update();
        self.watches.invalidate_all();
        self.finish_watch_batch();
    }
}
