//! Runtime abstraction: how plugin images are executed.
//!
//! The engine never talks to a container engine directly; it hands an
//! `Invocation` to a `Runtime`. `docker` drives a container CLI (docker or
//! podman), `local` treats the image reference as a local executable.

pub mod docker;
pub mod local;
#[cfg(test)]
pub(crate) mod scripted;

use crate::error::{Error, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A host path made visible to a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

/// One plugin execution request.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub image: &'a str,
    pub entrypoint: Option<&'a str>,
    pub args: &'a [String],
    pub mounts: &'a [Mount],
    pub stdin: &'a [u8],
}

/// Output from executing a plugin.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that can run plugin images.
pub trait Runtime {
    /// Short name for messages.
    fn name(&self) -> &str;

    /// Verify the runtime is usable before anything else happens.
    fn check(&self) -> Result<()>;

    /// Make an image available locally.
    fn pull(&self, image: &str) -> Result<()>;

    /// Run one invocation to completion.
    fn run(&self, invocation: &Invocation<'_>) -> Result<ExecOutput>;
}

/// Spawn a prepared command, feed it `stdin` and collect its output.
///
/// stdin is written from a separate thread while stdout/stderr are drained,
/// so a child that produces output before consuming all of its input cannot
/// deadlock on full pipes.
pub(crate) fn exec_with_stdin(cmd: &mut Command, stdin: &[u8]) -> Result<ExecOutput> {
    let program = cmd.get_program().to_string_lossy().to_string();
    tracing::debug!(program = %program, args = ?cmd.get_args().collect::<Vec<_>>(), "spawning");

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Runtime(format!("failed to spawn {}: {}", program, e)))?;

    let mut pipe = child
        .stdin
        .take()
        .ok_or_else(|| Error::Runtime(format!("no stdin pipe for {}", program)))?;

    let output = std::thread::scope(|scope| {
        let writer = scope.spawn(move || {
            // A child that exits without reading its input closes the pipe;
            // that is not an invocation failure.
            match pipe.write_all(stdin) {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        });
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
        written.and(output)
    })
    .map_err(|e| Error::Runtime(format!("{}: {}", program, e)))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
