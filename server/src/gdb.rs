use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use transport::ProcessTransport;

use crate::PROTOCOL_ARGS;

const DEFAULT_GDB: &str = "gdb";

/// How to start GDB
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GdbConfig {
    /// Explicit debugger binary; `gdb` is looked up on `PATH` otherwise
    pub gdb_path: Option<PathBuf>,
    /// Passed after the protocol arguments
    pub extra_args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// Program to debug
    pub program: Option<PathBuf>,
}

impl GdbConfig {
    pub fn for_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
            ..Default::default()
        }
    }

    pub fn from_json(contents: &str) -> eyre::Result<Self> {
        serde_json::from_str(contents).wrap_err("parsing gdb configuration")
    }

    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading gdb configuration {}", path.display()))?;
        Self::from_json(&contents)
    }

    /// Locate the debugger binary
    pub fn resolve_gdb(&self) -> eyre::Result<PathBuf> {
        let name = self
            .gdb_path
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_GDB));
        which::which(name).map_err(|_| {
            eyre::eyre!(
                "{} not found. Install gdb or set the debugger path",
                name.display()
            )
        })
    }

    /// Full argument list, protocol arguments first and the program last
    pub fn arguments(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = PROTOCOL_ARGS.iter().map(OsString::from).collect();
        args.extend(self.extra_args.iter().map(OsString::from));
        if let Some(program) = &self.program {
            args.push(OsString::from("--args"));
            args.push(program.clone().into_os_string());
        }
        args
    }
}

/// Start GDB and connect to its standard streams.
///
/// Standard error shares a pipe with standard output so error messages are
/// read in order with the annotations around them.
#[tracing::instrument(skip(config))]
pub fn spawn(config: &GdbConfig) -> eyre::Result<ProcessTransport> {
    let gdb = config.resolve_gdb()?;
    let args = config.arguments();
    tracing::debug!(gdb = %gdb.display(), ?args, "starting debugger process");

    let (output, output_writer) = std::io::pipe().wrap_err("creating output pipe")?;
    let error_writer = output_writer
        .try_clone()
        .wrap_err("duplicating output pipe")?;

    let mut command = Command::new(&gdb);
    command
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(output_writer)
        .stderr(error_writer);
    if let Some(cwd) = &config.working_directory {
        command.current_dir(cwd);
    }

    let child = command
        .spawn()
        .wrap_err_with(|| format!("spawning {}", gdb.display()))?;
    // the parent's copies of the write ends must go so EOF is seen when gdb exits
    drop(command);

    tracing::debug!(pid = child.id(), "debugger process started");
    ProcessTransport::with_output(child, output)
}
