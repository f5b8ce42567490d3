//! Container-engine runtime driven through its CLI (`docker` or `podman`).
//!
//! Each invocation is `<engine> run -i --rm [-v host:container[:ro]]...
//! [--entrypoint E] IMAGE ARGS...` with the request document piped to stdin.

use super::{exec_with_stdin, ExecOutput, Invocation, Runtime};
use crate::error::{Error, Result};
use std::process::Command;

/// Runs plugin images as throwaway containers.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn podman() -> Self {
        Self::new("podman")
    }

    /// Arguments for `<engine> run`.
    pub fn run_args(invocation: &Invocation<'_>) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-i".to_string(), "--rm".to_string()];
        for mount in invocation.mounts {
            let mut spec = format!("{}:{}", mount.host.display(), mount.container);
            if mount.read_only {
                spec.push_str(":ro");
            }
            args.push("-v".to_string());
            args.push(spec);
        }
        if let Some(entrypoint) = invocation.entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.to_string());
        }
        args.push(invocation.image.to_string());
        args.extend(invocation.args.iter().cloned());
        args
    }
}

impl Runtime for DockerRuntime {
    fn name(&self) -> &str {
        &self.binary
    }

    fn check(&self) -> Result<()> {
        let out = exec_with_stdin(Command::new(&self.binary).arg("version"), b"")
            .map_err(|e| Error::Runtime(format!("{} is not available: {}", self.binary, e)))?;
        if !out.success() {
            return Err(Error::Runtime(format!(
                "{} is not reachable (exit code {}): {}",
                self.binary,
                out.exit_code,
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    fn pull(&self, image: &str) -> Result<()> {
        tracing::info!(image, runtime = %self.binary, "pulling image");
        let out = exec_with_stdin(Command::new(&self.binary).args(["pull", image]), b"")?;
        if !out.success() {
            return Err(Error::Runtime(format!(
                "failed to pull {} (exit code {}): {}",
                image,
                out.exit_code,
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    fn run(&self, invocation: &Invocation<'_>) -> Result<ExecOutput> {
        let args = Self::run_args(invocation);
        exec_with_stdin(Command::new(&self.binary).args(&args), invocation.stdin)
    }
}
