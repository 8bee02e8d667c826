use transport::events::Signal;

use crate::types::Location;
use crate::watches::WatchBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DebuggerState {
    /// Waiting for the first prompt
    Starting,
    /// The debugger is up; the debugee may or may not be loaded
    Ready,
    /// An execution command is in progress
    Running,
    /// The debugger process has gone away
    Ended,
}

/// Notifications sent to the front end.
///
/// At most one notification per container is sent for each event read from
/// the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BreakpointsChanged,
    WatchesChanged(WatchBatch),
    BacktraceChanged,
    RegistersChanged,
    EvaluationReady(String),
    /// The debugger process exited; no further commands are accepted
    ProcessExited,
    Stopped(Signal),
    CommandFailed(String),
    /// Output of a command typed into the console
    ConsoleOutput(String),
    LocationChanged(Location),
    LocalsReady(Vec<String>),
    ParamsReady(Vec<String>),
    DisassemblyReady(Vec<String>),
    MemoryReady(Vec<String>),
    /// The debugee exited with the given code
    ProgramExited(i32),
}
