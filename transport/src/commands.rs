//! Commands written to the debugger's standard input

use std::fmt;

/// Who asked for a command to be run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandOrigin {
    /// Typed by the user into the debug console
    Console,
    /// Issued by the session itself
    #[default]
    Internal,
}

/// A single debugger command.
///
/// Commands are immutable once queued; the builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub text: String,
    pub parameters: String,
    /// Refresh the watch expressions once the command has completed
    pub update_watch: bool,
    /// Surface the command's raw output to the console
    pub echo_to_console: bool,
    pub origin: CommandOrigin,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: String::new(),
            update_watch: false,
            echo_to_console: false,
            origin: CommandOrigin::Internal,
        }
    }

    /// A command typed into the debug console: echoed and followed by a watch refresh
    pub fn console(line: impl AsRef<str>) -> Self {
        let line = line.as_ref().trim();
        let (text, parameters) = line.split_once(' ').unwrap_or((line, ""));
        Self::new(text)
            .with_parameters(parameters.trim())
            .updating_watches(true)
            .echoed(true)
            .from_origin(CommandOrigin::Console)
    }

    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn updating_watches(mut self, update_watch: bool) -> Self {
        self.update_watch = update_watch;
        self
    }

    pub fn echoed(mut self, echo_to_console: bool) -> Self {
        self.echo_to_console = echo_to_console;
        self
    }

    pub fn from_origin(mut self, origin: CommandOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// The line written to the debugger, without the trailing newline
    pub fn line(&self) -> String {
        self.to_string()
    }

    /// Whether this is the given command, ignoring parameters
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameters.is_empty() {
            write!(f, "{}", self.text)
        } else {
            write!(f, "{} {}", self.text, self.parameters)
        }
    }
}
