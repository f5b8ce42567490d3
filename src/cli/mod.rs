//! CLI subcommands: apply, validate, schema, completions.

use crate::console::Console;
use crate::core::manifest::Manifest;
use crate::core::plan::{Plan, PlanOptions};
use crate::core::protocol::{self, SchemaKind};
use crate::core::template::Vars;
use crate::error::{Error, Result};
use crate::runtime::docker::DockerRuntime;
use crate::runtime::local::LocalRuntime;
use crate::runtime::Runtime;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "convoy",
    version,
    about = "Declarative infrastructure reconciliation driven by container plugins"
)]
pub struct Cli {
    /// Debug logging and full error chains
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bring every resource in the manifests to its declared state
    Apply {
        /// Manifest files, merged in order
        #[arg(required = true)]
        manifests: Vec<PathBuf>,

        /// Show the deployment plan and stop
        #[arg(long)]
        plan: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Skip pulling plugin images
        #[arg(long)]
        no_pull: bool,

        #[command(flatten)]
        vars: VarArgs,

        /// Scratch directory for audit files (cleared on every run)
        #[arg(long, env = "CONVOY_WORK_DIR", default_value = ".convoy")]
        work_dir: PathBuf,

        /// How plugin images are executed
        #[arg(long, env = "CONVOY_RUNTIME", value_enum, default_value_t = RuntimeKind::Docker)]
        runtime: RuntimeKind,
    },

    /// Parse and merge manifests without running any plugin
    Validate {
        /// Manifest files, merged in order
        #[arg(required = true)]
        manifests: Vec<PathBuf>,

        #[command(flatten)]
        vars: VarArgs,
    },

    /// Print the JSON Schema of a protocol or manifest document
    Schema {
        #[arg(value_enum)]
        kind: SchemaKind,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Template variables for manifests.
#[derive(Args, Debug, Default)]
pub struct VarArgs {
    /// Set a template variable (dotted keys allowed, value parsed as YAML)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// YAML file of template variables (later files win)
    #[arg(long = "var-file", value_name = "FILE")]
    pub var_files: Vec<PathBuf>,
}

impl VarArgs {
    pub fn load(&self) -> Result<Vars> {
        let mut vars = Vars::new();
        for file in &self.var_files {
            vars.merge_file(file)?;
        }
        for assignment in &self.vars {
            vars.set_assignment(assignment)?;
        }
        Ok(vars)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RuntimeKind {
    Docker,
    Podman,
    /// Image references are local executables
    Local,
}

impl RuntimeKind {
    pub fn build(self) -> Box<dyn Runtime> {
        match self {
            Self::Docker => Box::new(DockerRuntime::docker()),
            Self::Podman => Box::new(DockerRuntime::podman()),
            Self::Local => Box::new(LocalRuntime::new()),
        }
    }
}

/// How `apply` proceeds once the plan is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    PlanOnly,
    Confirm,
    AutoApprove,
}

/// Dispatch a parsed command line.
pub fn dispatch(cli: Cli) -> Result<()> {
    let console = Console::stdout(cli.verbose);
    run_command(cli.command, &console)
}

/// Run one command, writing user-facing output to `console`.
pub fn run_command(cmd: Commands, console: &Console) -> Result<()> {
    match cmd {
        Commands::Apply {
            manifests,
            plan,
            yes,
            no_pull,
            vars,
            work_dir,
            runtime,
        } => {
            let mode = if plan {
                ApplyMode::PlanOnly
            } else if yes {
                ApplyMode::AutoApprove
            } else {
                ApplyMode::Confirm
            };
            let vars = vars.load()?;
            let manifest = Manifest::load(&manifests, &vars)?;
            let runtime = runtime.build();
            let options = PlanOptions {
                work_dir,
                workspace: std::env::current_dir()?,
                pull: !no_pull,
            };
            cmd_apply(manifest, runtime.as_ref(), options, mode, console)
        }
        Commands::Validate { manifests, vars } => cmd_validate(&manifests, &vars, console),
        Commands::Schema { kind } => {
            console.line(&protocol::schema_json(kind)?);
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "convoy", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Bootstrap, resolve, show the plan and, unless declined, execute it.
pub fn cmd_apply(
    manifest: Manifest,
    runtime: &dyn Runtime,
    options: PlanOptions,
    mode: ApplyMode,
    console: &Console,
) -> Result<()> {
    let resources = manifest.resources().len();
    let mut plan = Plan::new(manifest, runtime, options);
    tracing::info!(run_id = plan.run_id(), resources, runtime = runtime.name(), "starting run");

    console.info(&format!("Initializing {} resource(s)", resources));
    plan.bootstrap(console)?;
    console.info("Resolving state");
    plan.resolve(console)?;
    plan.display(console);

    if plan.is_empty() || mode == ApplyMode::PlanOnly {
        return Ok(());
    }
    if mode == ApplyMode::Confirm && !confirm()? {
        return Err(Error::Cancelled);
    }

    plan.execute(console)?;
    console.success("All resources are up to date");
    Ok(())
}

fn confirm() -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Err(Error::Config(
            "stdin is not a terminal; pass --yes to apply without confirmation".to_string(),
        ));
    }
    dialoguer::Confirm::new()
        .with_prompt("Apply this plan?")
        .default(false)
        .interact()
        .map_err(|e| Error::Runtime(format!("cannot read confirmation: {}", e)))
}

fn cmd_validate(manifests: &[PathBuf], vars: &VarArgs, console: &Console) -> Result<()> {
    let vars = vars.load()?;
    let manifest = Manifest::load(manifests, &vars)?;
    console.success(&format!(
        "{} manifest(s) valid: {} plug(s), {} resource(s)",
        manifests.len(),
        manifest.plugs().len(),
        manifest.resources().len()
    ));
    let nested = console.nested();
    for r in manifest.resources().values() {
        nested.detail(&format!("{} ({})", r.name, r.resource_type));
    }
    nested.detail(&format!("digest: {}", manifest.digest()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::eventlog::RunEvent;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Bash plugin that is MISSING until its `create` action has run.
    const PLUGIN: &str = r#"#!/usr/bin/env bash
request=$(cat)
marker="$(dirname "$0")/$(basename "$0").created"
case "$1" in
  init)
    echo '{"config_schema": {"type": "object", "required": ["size"]}}'
    ;;
  state)
    if [ -f "$marker" ]; then
      echo '{"status": "VALID", "properties": {"size": 1}}'
    else
      echo '{"status": "MISSING", "actions": [{"name": "create", "description": "Create it"}]}'
    fi
    ;;
  create)
    echo "$request" > "$marker"
    echo "created"
    ;;
  *)
    echo "unknown action $1" >&2
    exit 64
    ;;
esac
"#;

    fn write_plugin(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, PLUGIN).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn write_manifest(dir: &Path, plugin: &str, size: &str) -> PathBuf {
        let path = dir.join("convoy.yaml");
        std::fs::write(
            &path,
            format!(
                "resources:\n  box:\n    type: {}\n    config:\n      size: {}\n",
                plugin, size
            ),
        )
        .unwrap();
        path
    }

    fn options(dir: &Path) -> PlanOptions {
        let workspace = dir.join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        PlanOptions {
            work_dir: dir.join("work"),
            workspace,
            pull: true,
        }
    }

    #[test]
    fn test_apply_with_local_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = write_plugin(dir.path(), "box-plugin");
        let path = write_manifest(dir.path(), &plugin, "{{ size }}");
        let mut vars = Vars::new();
        vars.set_assignment("size=3").unwrap();
        let manifest = Manifest::load(&[path], &vars).unwrap();

        let console = Console::buffered(true);
        let opts = options(dir.path());
        cmd_apply(manifest, &LocalRuntime::new(), opts.clone(), ApplyMode::AutoApprove, &console)
            .unwrap();

        let out = console.contents();
        assert!(out.contains("+ box"));
        assert!(out.contains("Create it"));
        assert!(out.contains("created"));
        assert!(out.contains("All resources are up to date"));

        let request = std::fs::read_to_string(dir.path().join("box-plugin.created")).unwrap();
        let request: serde_json::Value = serde_json::from_str(&request).unwrap();
        assert_eq!(request["config"]["size"], 3);

        let audit = std::fs::read_dir(opts.work_dir.join("box")).unwrap().count();
        assert_eq!(audit, 4 * 3);

        let events = crate::core::eventlog::EventLog::new(&opts.work_dir).read().unwrap();
        assert!(matches!(events.first().unwrap().event, RunEvent::RunStarted { .. }));
        assert!(matches!(
            events.last().unwrap().event,
            RunEvent::RunCompleted { resources_executed: 1, .. }
        ));
    }

    #[test]
    fn test_plan_only_runs_no_actions() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = write_plugin(dir.path(), "box-plugin");
        let path = write_manifest(dir.path(), &plugin, "1");
        let manifest = Manifest::load(&[path], &Vars::new()).unwrap();
        let console = Console::buffered(false);
        cmd_apply(manifest, &LocalRuntime::new(), options(dir.path()), ApplyMode::PlanOnly, &console)
            .unwrap();
        assert!(console.contents().contains("Deployment plan:"));
        assert!(!dir.path().join("box-plugin.created").exists());
    }

    #[test]
    fn test_apply_config_rejected_by_plugin_schema() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = write_plugin(dir.path(), "box-plugin");
        let path = dir.path().join("convoy.yaml");
        std::fs::write(&path, format!("resources:\n  box:\n    type: {}\n", plugin)).unwrap();
        let manifest = Manifest::load(&[path], &Vars::new()).unwrap();
        let err = cmd_apply(
            manifest,
            &LocalRuntime::new(),
            options(dir.path()),
            ApplyMode::AutoApprove,
            &Console::buffered(false),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("resource 'box'"));
        assert!(msg.contains("size"));
    }

    #[test]
    fn test_apply_missing_plugin_fails_pull() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), "/nonexistent/plugin", "1");
        let manifest = Manifest::load(&[path], &Vars::new()).unwrap();
        let err = cmd_apply(
            manifest,
            &LocalRuntime::new(),
            options(dir.path()),
            ApplyMode::AutoApprove,
            &Console::buffered(false),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[test]
    fn test_validate_counts() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        std::fs::write(&a, "plugs:\n  p:\n    path: /p\nresources:\n  x:\n    type: t\n").unwrap();
        std::fs::write(&b, "resources:\n  y:\n    type: '{{ img }}'\n").unwrap();
        let vars = VarArgs {
            vars: vec!["img=plugins/y".to_string()],
            var_files: vec![],
        };
        let console = Console::buffered(true);
        cmd_validate(&[a, b], &vars, &console).unwrap();
        let out = console.contents();
        assert!(out.contains("2 manifest(s) valid: 1 plug(s), 2 resource(s)"));
        assert!(out.contains("y (plugins/y)"));
        assert!(out.contains("digest: blake3:"));
    }

    #[test]
    fn test_var_files_then_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("vars.yaml");
        std::fs::write(&f, "region: eu\nsize: 1\n").unwrap();
        let args = VarArgs {
            vars: vec!["size=2".to_string()],
            var_files: vec![f],
        };
        let vars = args.load().unwrap();
        assert_eq!(vars.lookup("region").unwrap().as_str(), Some("eu"));
        assert_eq!(vars.lookup("size").unwrap().as_u64(), Some(2));
    }

    #[test]
    fn test_schema_command() {
        let console = Console::buffered(false);
        run_command(
            Commands::Schema {
                kind: SchemaKind::StateResponse,
            },
            &console,
        )
        .unwrap();
        assert!(console.contents().contains("staleProperties"));
    }

    #[test]
    fn test_cli_parses_apply() {
        let cli = Cli::try_parse_from([
            "convoy", "-v", "apply", "a.yaml", "b.yaml", "--yes", "--runtime", "local", "--var",
            "x=1",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Apply {
                manifests,
                yes,
                runtime,
                vars,
                ..
            } => {
                assert_eq!(manifests.len(), 2);
                assert!(yes);
                assert_eq!(runtime, RuntimeKind::Local);
                assert_eq!(vars.vars, vec!["x=1"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cli_requires_manifest() {
        assert!(Cli::try_parse_from(["convoy", "apply"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
