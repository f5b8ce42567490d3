//! Action invocation with an on-disk audit trail.
//!
//! Every call writes `stdin-*.json`, `stdout-*.json` and `stderr-*.json`
//! into the caller's work directory, whatever the outcome, then applies one
//! of two calling conventions: JSON (init and state) or text (corrective actions).

use super::types::Action;
use crate::error::{Error, Result};
use crate::runtime::{ExecOutput, Invocation, Mount, Runtime};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Container path of the workspace (the directory convoy runs from).
pub const WORKSPACE_MOUNT: &str = "/convoy/workspace";

/// Container path of the per-resource work directory.
pub const WORK_MOUNT: &str = "/convoy/work";

/// Runs actions through a runtime.
pub struct Invoker<'r> {
    runtime: &'r dyn Runtime,
}

impl<'r> Invoker<'r> {
    pub fn new(runtime: &'r dyn Runtime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &'r dyn Runtime {
        self.runtime
    }

    /// Run an action, persisting its input and output under `work_dir`.
    pub fn invoke(
        &self,
        work_dir: &Path,
        action: &Action,
        mounts: &[Mount],
        stdin: &Value,
    ) -> Result<ExecOutput> {
        std::fs::create_dir_all(work_dir)?;
        let stem = audit_stem(work_dir, &action.name);
        let input = serde_json::to_vec_pretty(stdin)
            .map_err(|e| Error::Runtime(format!("cannot encode request: {}", e)))?;
        std::fs::write(audit_path(work_dir, "stdin", &stem), &input)?;

        let args = action.effective_args();
        tracing::debug!(action = %action.name, image = %action.image, "invoking");
        let result = self.runtime.run(&Invocation {
            image: &action.image,
            entrypoint: action.entrypoint.as_deref(),
            args: &args,
            mounts,
            stdin: &input,
        });

        match result {
            Ok(out) => {
                std::fs::write(audit_path(work_dir, "stdout", &stem), &out.stdout)?;
                std::fs::write(audit_path(work_dir, "stderr", &stem), &out.stderr)?;
                tracing::debug!(action = %action.name, exit_code = out.exit_code, "invocation finished");
                Ok(out)
            }
            Err(e) => {
                std::fs::write(audit_path(work_dir, "stdout", &stem), "")?;
                std::fs::write(audit_path(work_dir, "stderr", &stem), e.to_string())?;
                Err(e)
            }
        }
    }

    /// Run an action whose stdout must be a JSON document.
    pub fn run_expecting_json(
        &self,
        resource: &str,
        work_dir: &Path,
        action: &Action,
        mounts: &[Mount],
        stdin: &Value,
    ) -> Result<Value> {
        let out = self.invoke(work_dir, action, mounts, stdin)?;
        if !out.success() {
            return Err(Error::protocol(
                resource,
                format!(
                    "action '{}' failed with exit code {}: {}",
                    action.name,
                    out.exit_code,
                    out.stderr.trim()
                ),
            ));
        }
        if out.stdout.trim().is_empty() {
            return Err(Error::protocol(
                resource,
                format!("action '{}' produced no output", action.name),
            ));
        }
        serde_json::from_str(&out.stdout).map_err(|e| {
            Error::protocol(
                resource,
                format!(
                    "action '{}' produced invalid JSON ({}): {}",
                    action.name,
                    e,
                    out.stdout.trim()
                ),
            )
        })
    }

    /// Run an action where only the exit code matters.
    pub fn run_expecting_text(
        &self,
        resource: &str,
        work_dir: &Path,
        action: &Action,
        mounts: &[Mount],
        stdin: &Value,
    ) -> Result<String> {
        let out = self.invoke(work_dir, action, mounts, stdin)?;
        if !out.success() {
            return Err(Error::ActionFailed {
                resource: resource.to_string(),
                action: action.name.clone(),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }
}

fn audit_path(work_dir: &Path, stream: &str, stem: &str) -> PathBuf {
    work_dir.join(format!("{}-{}.json", stream, stem))
}

/// `<timestamp>-<action>`, suffixed when an earlier call already used it.
fn audit_stem(work_dir: &Path, action: &str) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f").to_string();
    let action: String = action
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let base = format!("{}-{}", stamp, action);
    let mut stem = base.clone();
    let mut n = 1;
    while audit_path(work_dir, "stdin", &stem).exists() {
        stem = format!("{}-{}", base, n);
        n += 1;
    }
    stem
}
