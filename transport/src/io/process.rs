//! Transport over a spawned debugger's standard streams

use std::io::Read;
use std::process::{Child, ChildStdin};
use std::time::{Duration, Instant};

use eyre::WrapErr;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use super::{DebuggerTransport, Terminate};

const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Talks to a child process over its piped stdin and stdout
pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
    output: Box<dyn Read + Send>,
}

impl ProcessTransport {
    /// The child must have been spawned with `Stdio::piped()` for stdin and stdout
    pub fn new(mut child: Child) -> eyre::Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| eyre::eyre!("debugger stdout is not piped"))?;
        Self::with_output(child, stdout)
    }

    /// Read the debugger's output from `output` instead of the child's stdout,
    /// e.g. a pipe shared by stdout and stderr
    pub fn with_output(mut child: Child, output: impl Read + Send + 'static) -> eyre::Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| eyre::eyre!("debugger stdin is not piped"))?;
        Ok(Self {
            child,
            stdin,
            output: Box::new(output),
        })
    }
}

impl DebuggerTransport for ProcessTransport {
    type Reader = Box<dyn Read + Send>;
    type Writer = ChildStdin;

    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer, Box<dyn Terminate>)> {
        let terminator = ChildTerminator {
            child: Some(self.child),
        };
        Ok((self.output, self.stdin, Box::new(terminator)))
    }
}

struct ChildTerminator {
    child: Option<Child>,
}

impl Terminate for ChildTerminator {
    fn terminate(&mut self) -> eyre::Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if child.try_wait().wrap_err("polling debugger process")?.is_some() {
            tracing::debug!("debugger process already exited");
            return Ok(());
        }

        tracing::debug!(pid = child.id(), "terminating debugger process");
        let pid = Pid::from_raw(child.id() as i32);
        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            tracing::warn!(error = %e, "could not signal debugger process");
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if let Some(status) = child.try_wait().wrap_err("polling debugger process")? {
                tracing::debug!(?status, "debugger process exited");
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        tracing::debug!("debugger ignored SIGTERM, killing");
        child.kill().wrap_err("killing debugger process")?;
        child.wait().wrap_err("waiting for debugger process")?;
        Ok(())
    }
}

impl Drop for ChildTerminator {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            tracing::warn!(error = %e, "could not terminate debugger process");
        }
    }
}
