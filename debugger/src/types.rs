use eyre::Context;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Index into the breakpoint list
pub type BreakpointIndex = usize;

// Serialize/Deserialize are required for persisting
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Breakpoint {
    pub path: PathBuf,
    pub line: usize,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// GDB's number for this breakpoint, known once `break` has completed
    #[serde(skip)]
    pub number: Option<u32>,
}

fn enabled_by_default() -> bool {
    true
}

impl Breakpoint {
    pub fn new(path: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            path: path.into(),
            line,
            condition: None,
            enabled: true,
            number: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn normalised_path(&self) -> Cow<'_, Path> {
        crate::utils::normalise_path(&self.path)
    }

    /// Location in the form GDB's `break` and `clear` accept
    pub fn location(&self) -> String {
        format!("\"{}\":{}", self.normalised_path().display(), self.line)
    }
}

impl FromStr for Breakpoint {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path_str, lineno_str) = s
            .rsplit_once(':')
            .ok_or_else(|| eyre::eyre!("breakpoint location '{s}' has no colon"))?;

        let lineno = lineno_str.parse().wrap_err("invalid line number")?;
        let mut path = PathBuf::from(path_str);

        // if passed a relative path, assume the current working directory
        if path.is_relative() {
            path = std::env::current_dir()
                .context("getting current working directory")?
                .join(path);
        }

        Ok(Self::new(path, lineno))
    }
}

/// An edit made to a source file in the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEdit {
    LinesInserted {
        path: PathBuf,
        start_line: usize,
        count: usize,
    },
    LinesDeleted {
        path: PathBuf,
        start_line: usize,
        count: usize,
    },
    /// The file was removed from the project
    FileRemoved { path: PathBuf },
}

/// Current execution point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: PathBuf,
    pub line: usize,
}
