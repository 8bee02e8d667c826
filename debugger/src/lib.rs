//! GDB debugging session
//!
//! [`Debugger`] drives a GDB process through the `transport` crate, keeps
//! the session's breakpoints, watches, backtrace and registers, and tells the
//! front end about changes through [`Event`]s.
mod breakpoints;
mod debugger;
mod internals;
mod state;
mod types;
pub mod utils;
mod watches;

pub use breakpoints::{Breakpoints, EditOutcome};
pub use debugger::Debugger;
pub use state::Event;
pub use types::{Breakpoint, BreakpointIndex, Location, SourceEdit};
pub use watches::{WatchBatch, WatchId, WatchVar, Watches};

pub use transport::events::{Register, Signal, StackFrame};
