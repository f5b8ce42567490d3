//! Local runtime: the image reference is an executable on this machine.
//!
//! Meant for plugin development and tests where no container engine is
//! available. Mounts cannot be bind-mounted, so they are exported to the
//! plugin as `CONVOY_MOUNTS` (one `host:container:ro|rw` per line).

use super::{exec_with_stdin, ExecOutput, Invocation, Mount, Runtime};
use crate::error::{Error, Result};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct LocalRuntime;

impl LocalRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn mounts_env(mounts: &[Mount]) -> String {
    mounts
        .iter()
        .map(|m| {
            format!(
                "{}:{}:{}",
                m.host.display(),
                m.container,
                if m.read_only { "ro" } else { "rw" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Runtime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn pull(&self, image: &str) -> Result<()> {
        if Path::new(image).is_file() {
            Ok(())
        } else {
            Err(Error::Runtime(format!("plugin executable {} not found", image)))
        }
    }

    fn run(&self, invocation: &Invocation<'_>) -> Result<ExecOutput> {
        let program = invocation.entrypoint.unwrap_or(invocation.image);
        let mut cmd = Command::new(program);
        cmd.args(invocation.args)
            .env("CONVOY_IMAGE", invocation.image)
            .env("CONVOY_MOUNTS", mounts_env(invocation.mounts));
        exec_with_stdin(&mut cmd, invocation.stdin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/usr/bin/env bash\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_local_runs_image_with_args_and_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = script(dir.path(), "plugin", "echo \"$1:$(cat)\"\n");
        let image = plugin.to_string_lossy().to_string();
        let out = LocalRuntime::new()
            .run(&Invocation {
                image: &image,
                entrypoint: None,
                args: &["state".to_string()],
                mounts: &[],
                stdin: b"{}",
            })
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "state:{}");
    }

    #[test]
    fn test_local_exports_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = script(dir.path(), "plugin", "echo \"$CONVOY_MOUNTS\"\n");
        let image = plugin.to_string_lossy().to_string();
        let mounts = vec![Mount {
            host: PathBuf::from("/h"),
            container: "/c".to_string(),
            read_only: true,
        }];
        let out = LocalRuntime::new()
            .run(&Invocation {
                image: &image,
                entrypoint: None,
                args: &[],
                mounts: &mounts,
                stdin: b"",
            })
            .unwrap();
        assert_eq!(out.stdout.trim(), "/h:/c:ro");
    }

    #[test]
    fn test_local_entrypoint_override() {
        let dir = tempfile::tempdir().unwrap();
        let other = script(dir.path(), "other", "echo \"other $CONVOY_IMAGE\"\n");
        let entry = other.to_string_lossy().to_string();
        let out = LocalRuntime::new()
            .run(&Invocation {
                image: "plugins/not-a-file",
                entrypoint: Some(&entry),
                args: &[],
                mounts: &[],
                stdin: b"",
            })
            .unwrap();
        assert_eq!(out.stdout.trim(), "other plugins/not-a-file");
    }

    #[test]
    fn test_local_pull_checks_file() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = script(dir.path(), "plugin", "true\n");
        let rt = LocalRuntime::new();
        assert!(rt.pull(&plugin.to_string_lossy()).is_ok());
        assert!(rt.pull("/nonexistent/plugin").is_err());
    }
}
