//! Structured events assembled from the annotated output stream
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Command;

/// One entry of a backtrace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function_name: String,
    pub path: Option<PathBuf>,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub hex_value: String,
    pub decimal_value: String,
}

impl Register {
    /// Parse one line of `info registers` output, e.g. `rax 0x1c 28`
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let name = parts.next()?;
        let hex_value = parts.next()?;
        let decimal_value = parts.collect::<Vec<_>>().join(" ");
        Some(Self {
            name: name.to_string(),
            hex_value: hex_value.to_string(),
            decimal_value,
        })
    }
}

/// A printed value, with struct and array structure recovered from the
/// field and array annotations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Scalar(String),
    Struct(Vec<(String, Value)>),
    Array(Vec<Value>),
}

impl Value {
    /// Number of scalar values in the tree
    pub fn leaf_count(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Struct(fields) => fields.iter().map(|(_, v)| v.leaf_count()).sum(),
            Value::Array(elements) => elements.iter().map(Value::leaf_count).sum(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Scalar(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                write!(f, "}}")
            }
            Value::Array(elements) => {
                write!(f, "{{")?;
                for (i, value) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// The value of one auto-display expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Display {
    /// GDB's display number
    pub slot: u32,
    pub expression: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub description: String,
}

/// The end of a command's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// `None` for the output the debugger prints before its first prompt
    pub command: Option<Command>,
    /// Plain output that was not part of any structured block
    pub output: String,
    /// Text of an error block reported while the command ran
    pub error: Option<String>,
}

impl Completion {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// All frames printed while one command ran
    Backtrace(Vec<StackFrame>),
    /// All auto-displays printed while one command ran
    Watches(Vec<Display>),
    Registers(Vec<Register>),
    Locals(Vec<String>),
    Params(Vec<String>),
    Disassembly(Vec<String>),
    Memory(Vec<String>),
    /// Result of a value history entry, e.g. from `print`
    Evaluation(String),
    /// The current execution point
    Source { path: PathBuf, line: usize },
    Signal(Signal),
    /// The debugee exited with the given code
    Exited(i32),
    CommandCompleted(Completion),
    /// The debugger process itself has gone away
    ProcessExited,
}
