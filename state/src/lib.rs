//! The state module handles persisting the state of a debugging session between sessions.

use std::{
    io::Read,
    io::Write,
    path::{Path, PathBuf},
};

use debugger::{Breakpoint, Debugger};
use eyre::Context;
use serde::{Deserialize, Serialize};

/// Where the state lives unless told otherwise
pub fn default_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("gdb-session")
        .join("state.json")
}

pub struct StateManager {
    save_path: PathBuf,
    current: Persistence,
}

impl StateManager {
    pub fn new(path: impl Into<PathBuf>) -> eyre::Result<Self> {
        let path = path.into();
        let span = tracing::debug_span!("StateManager", state_path = %path.display());
        let _guard = span.enter();

        tracing::debug!("attempting to load state");
        match crate::load_from(&path) {
            Ok(state) => {
                tracing::debug!("state loaded");
                Ok(Self {
                    save_path: path,
                    current: state,
                })
            }
            Err(e) => {
                if path.exists() {
                    let backup = backup_path(&path);
                    tracing::warn!(
                        error = %e,
                        backup = %backup.display(),
                        "state file is unreadable, keeping a copy and starting afresh"
                    );
                    std::fs::copy(&path, &backup).wrap_err("backing up unreadable state file")?;
                } else {
                    tracing::debug!("no state file, starting afresh");
                }
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).context("creating state directory")?;
                }
                let state = Persistence::default();
                crate::save_to(&state, &path).wrap_err("saving state file")?;

                Ok(Self {
                    save_path: path,
                    current: state,
                })
            }
        }
    }

    pub fn load(mut self) -> eyre::Result<Self> {
        let state = crate::load_from(&self.save_path).wrap_err("loading state")?;
        self.current = state;
        Ok(self)
    }

    pub fn save(self) -> eyre::Result<Self> {
        crate::save_to(&self.current, &self.save_path).wrap_err("saving state")?;
        Ok(self)
    }

    pub fn current(&self) -> &Persistence {
        &self.current
    }

    pub fn project(&self, program: &Path) -> Option<&Project> {
        self.current.projects.iter().find(|p| p.program == program)
    }

    /// Replace the saved project for the same program, or add it
    pub fn update_project(&mut self, project: Project) {
        match self
            .current
            .projects
            .iter_mut()
            .find(|p| p.program == project.program)
        {
            Some(existing) => *existing = project,
            None => self.current.projects.push(project),
        }
    }
}

/// State that is persisted
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Persistence {
    pub projects: Vec<Project>,
    pub version: String,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// State that is persisted per debugged program
#[derive(Default, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub program: PathBuf,
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
    /// Top level watch expressions
    #[serde(default)]
    pub watches: Vec<String>,
}

impl Project {
    /// Snapshot the breakpoints and watches of a session
    pub fn capture(program: impl Into<PathBuf>, debugger: &Debugger) -> Self {
        let watches = debugger.watches();
        Self {
            program: program.into(),
            breakpoints: debugger.breakpoints().iter().cloned().collect(),
            watches: watches
                .roots()
                .iter()
                .filter_map(|id| watches.get(*id))
                .map(|w| w.full_expression.clone())
                .collect(),
        }
    }

    /// Add the saved breakpoints and watches to a session.
    ///
    /// Entries the session already has are skipped.
    pub fn restore(&self, debugger: &mut Debugger) -> eyre::Result<()> {
        for breakpoint in &self.breakpoints {
            if debugger
                .breakpoints()
                .at(&breakpoint.path, breakpoint.line)
                .is_some()
            {
                tracing::debug!(?breakpoint, "breakpoint already set");
                continue;
            }
            debugger
                .add_breakpoint(breakpoint.clone())
                .wrap_err("restoring breakpoint")?;
        }
        for expression in &self.watches {
            if debugger.watches().find(expression).is_some() {
                tracing::debug!(%expression, "already watching");
                continue;
            }
            debugger.add_watch(expression).wrap_err("restoring watch")?;
        }
        Ok(())
    }
}

/// `state.json` is backed up as `state.json.bak`
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

pub fn save(state: &Persistence, writer: impl Write) -> eyre::Result<()> {
    serde_json::to_writer_pretty(writer, state).context("saving debugger state")?;
    Ok(())
}

pub fn save_to(state: &Persistence, path: impl AsRef<Path>) -> eyre::Result<()> {
    let f = std::fs::File::create(path).context("creating file for saving")?;
    save(state, &f).context("saving state")?;
    Ok(())
}

pub fn load(reader: impl Read) -> eyre::Result<Persistence> {
    let st = serde_json::from_reader(reader).context("reading debugger state")?;
    Ok(st)
}

pub fn load_from(path: impl AsRef<Path>) -> eyre::Result<Persistence> {
    let path = path.as_ref();
    let f = std::fs::File::open(path)
        .with_context(|| format!("opening save state {}", path.display()))?;
    let state = load(f).context("reading from state file")?;
    Ok(state)
}
