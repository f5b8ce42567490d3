//! Per-resource runtime state: init contract, state resolution, execution.
//!
//! A `ResourceState` never looks at other resources' states directly. The
//! plan computes a `DependencyView` for it before each resolution, which
//! keeps every state independently mutable.

use super::eventlog::{EventLog, RunEvent};
use super::invoker::{Invoker, WORKSPACE_MOUNT, WORK_MOUNT};
use super::manifest::Manifest;
use super::protocol::{self, StateReport};
use super::types::{strip_tag, Action, Plug, Resource, Status};
use crate::console::Console;
use crate::error::{Error, Result};
use crate::runtime::Mount;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// What a resource's dependencies look like right now.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyView {
    /// The dependency behind this alias has not been resolved yet.
    Pending(String),
    /// The dependency behind this alias is MISSING.
    Missing(String),
    /// All dependencies resolved: alias → snapshot.
    Ready(Map<String, Value>),
}

/// A plug granted to a resource.
#[derive(Debug, Clone)]
pub struct GrantedPlug {
    pub plug: Plug,
    pub writable: bool,
}

#[derive(Debug)]
pub struct ResourceState {
    resource: Resource,
    work_dir: PathBuf,
    config_schema: Option<Value>,
    /// container path → plug
    plugs: IndexMap<String, GrantedPlug>,
    /// alias → resource name, accepted by the plugin
    dependencies: IndexMap<String, String>,
    state_action: Option<Action>,

    status: Option<Status>,
    actions: Vec<Action>,
    properties: Option<Map<String, Value>>,
    stale_properties: Option<Value>,
    reason: Option<String>,
}

impl ResourceState {
    /// `plan_work_dir` is the run's work directory; the resource gets its own
    /// subdirectory named after it.
    pub fn new(resource: Resource, plan_work_dir: &Path) -> Self {
        let work_dir = plan_work_dir.join(&resource.name);
        Self {
            resource,
            work_dir,
            config_schema: None,
            plugs: IndexMap::new(),
            dependencies: IndexMap::new(),
            state_action: None,
            status: None,
            actions: Vec::new(),
            properties: None,
            stale_properties: None,
            reason: None,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn name(&self) -> &str {
        &self.resource.name
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn config_schema(&self) -> Option<&Value> {
        self.config_schema.as_ref()
    }

    pub fn plugs(&self) -> &IndexMap<String, GrantedPlug> {
        &self.plugs
    }

    /// Validated dependency wiring (alias → resource name).
    pub fn dependencies(&self) -> &IndexMap<String, String> {
        &self.dependencies
    }

    pub fn state_action(&self) -> Option<&Action> {
        self.state_action.as_ref()
    }

    /// `None` until resolved.
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.properties.as_ref()
    }

    pub fn stale_properties(&self) -> Option<&Value> {
        self.stale_properties.as_ref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Mounts for every invocation: workspace, work dir, granted plugs.
    pub fn mounts(&self, workspace: &Path) -> Vec<Mount> {
        let mut mounts = vec![
            Mount {
                host: workspace.to_path_buf(),
                container: WORKSPACE_MOUNT.to_string(),
                read_only: false,
            },
            Mount {
                host: self.work_dir.clone(),
                container: WORK_MOUNT.to_string(),
                read_only: false,
            },
        ];
        for (container_path, granted) in &self.plugs {
            mounts.push(Mount {
                host: granted.plug.host_path.clone(),
                container: container_path.clone(),
                read_only: !granted.writable,
            });
        }
        mounts
    }

    /// Request document for init and state queries.
    fn request(&self, dependencies: Value) -> Value {
        json!({
            "name": self.resource.name,
            "type": self.resource.resource_type,
            "config": self.resource.config,
            "dependencies": dependencies,
        })
    }

    /// Snapshot of this resource as seen by its dependents. `dependencies`
    /// holds the snapshots of this resource's own dependencies.
    pub fn snapshot(&self, dependencies: Map<String, Value>) -> Value {
        let mut snap = Map::new();
        snap.insert("name".into(), json!(self.resource.name));
        snap.insert("type".into(), json!(self.resource.resource_type));
        snap.insert("config".into(), self.resource.config.clone());
        if let Some(props) = &self.properties {
            snap.insert("properties".into(), Value::Object(props.clone()));
        }
        if let Some(stale) = &self.stale_properties {
            snap.insert("staleProperties".into(), stale.clone());
        }
        snap.insert("dependencies".into(), Value::Object(dependencies));
        Value::Object(snap)
    }

    // ========================================================================
    // initialize
    // ========================================================================

    /// Run the plugin's `init` action and check the resource against it.
    pub fn initialize(
        &mut self,
        invoker: &Invoker<'_>,
        manifest: &Manifest,
        workspace: &Path,
        console: &Console,
    ) -> Result<()> {
        let name = self.resource.name.clone();
        let init = Action {
            name: "init".to_string(),
            description: format!("Initialize {}", name),
            image: self.resource.resource_type.clone(),
            entrypoint: None,
            args: Vec::new(),
        };
        let wiring = json!(self.resource.dependencies);
        let request = self.request(wiring);
        let mounts = self.mounts(workspace);
        let doc = invoker.run_expecting_json(&name, &self.work_dir, &init, &mounts, &request)?;
        let response = protocol::parse_init_response(&name, doc)?;

        if let Some(schema) = &response.config_schema {
            validate_config(&name, schema, &self.resource.config)?;
        }
        self.config_schema = response.config_schema.clone();

        for (plug_name, req) in &response.plugs {
            match self.grant_plug(manifest, plug_name, req.writable) {
                Ok(granted) => {
                    if let Some(other) = self.plugs.get(&req.container_path) {
                        return Err(Error::resource_config(
                            &name,
                            format!(
                                "plugs '{}' and '{}' both mount at {}",
                                other.plug.name, plug_name, req.container_path
                            ),
                        ));
                    }
                    self.plugs.insert(req.container_path.clone(), granted);
                }
                Err(problem) if req.optional => {
                    tracing::warn!(resource = %name, plug = %plug_name, "{}", problem);
                    console.warn(&format!("{}: skipping optional plug: {}", name, problem));
                }
                Err(problem) => return Err(Error::resource_config(&name, problem)),
            }
        }

        self.dependencies = self.check_dependencies(manifest, &response.dependencies)?;

        let spec = response.state_action.unwrap_or_default();
        let resource_type = self.resource.resource_type.clone();
        self.state_action = Some(
            spec.into_action(Some("state"), &resource_type, |_| {
                format!("Resolve state of {}", name)
            })
            .ok_or_else(|| Error::protocol(&name, "state action has no name"))?,
        );

        tracing::debug!(
            resource = %name,
            plugs = self.plugs.len(),
            dependencies = self.dependencies.len(),
            "initialized"
        );
        Ok(())
    }

    fn grant_plug(
        &self,
        manifest: &Manifest,
        plug_name: &str,
        writable: bool,
    ) -> std::result::Result<GrantedPlug, String> {
        let plug = manifest
            .plug(plug_name)
            .ok_or_else(|| format!("requested plug '{}' is not declared", plug_name))?;
        if !plug.allows(&self.resource) {
            return Err(format!("plug '{}' is not applicable to this resource", plug_name));
        }
        if plug.read_only && writable {
            return Err(format!(
                "plug '{}' is read-only but the plugin requires write access",
                plug_name
            ));
        }
        Ok(GrantedPlug {
            plug: plug.clone(),
            writable,
        })
    }

    fn check_dependencies(
        &self,
        manifest: &Manifest,
        accepted: &IndexMap<String, protocol::DependencyRequest>,
    ) -> Result<IndexMap<String, String>> {
        let name = &self.resource.name;
        for alias in self.resource.dependencies.keys() {
            if !accepted.contains_key(alias) {
                return Err(Error::resource_config(
                    name,
                    format!("does not accept dependency '{}'", alias),
                ));
            }
        }
        for (alias, req) in accepted {
            if !req.optional && !self.resource.dependencies.contains_key(alias) {
                return Err(Error::resource_config(
                    name,
                    format!(
                        "missing required dependency '{}' (type {})",
                        alias, req.dependency_type
                    ),
                ));
            }
        }

        let mut wired = IndexMap::new();
        for (alias, target) in &self.resource.dependencies {
            let dep = manifest.resource(target).ok_or_else(|| {
                Error::resource_config(
                    name,
                    format!("depends on unknown resource '{}' (as '{}')", target, alias),
                )
            })?;
            let expected = &accepted[alias].dependency_type;
            if strip_tag(&dep.resource_type) != strip_tag(expected) {
                return Err(Error::resource_config(
                    name,
                    format!(
                        "dependency '{}' must be of type '{}' but '{}' is of type '{}'",
                        alias, expected, target, dep.resource_type
                    ),
                ));
            }
            wired.insert(alias.clone(), target.clone());
        }
        Ok(wired)
    }

    // ========================================================================
    // resolve
    // ========================================================================

    /// Resolve actual state. Already-resolved states are left alone unless
    /// `force` is set; pending dependencies leave the state unresolved.
    pub fn resolve(
        &mut self,
        invoker: &Invoker<'_>,
        view: DependencyView,
        force: bool,
        workspace: &Path,
    ) -> Result<()> {
        if self.status.is_some() && !force {
            return Ok(());
        }

        let report = match view {
            DependencyView::Pending(alias) => {
                tracing::debug!(resource = %self.resource.name, alias = %alias, "waiting on dependency");
                return Ok(());
            }
            DependencyView::Missing(alias) => {
                tracing::debug!(resource = %self.resource.name, alias = %alias, "dependency missing, cascading");
                StateReport::Missing {
                    actions: Vec::new(),
                    stale_properties: None,
                }
            }
            DependencyView::Ready(snapshots) => {
                let action = self.state_action.clone().ok_or_else(|| {
                    Error::protocol(&self.resource.name, "resolved before initialization")
                })?;
                let request = self.request(Value::Object(snapshots));
                let mounts = self.mounts(workspace);
                let doc = invoker.run_expecting_json(
                    &self.resource.name,
                    &self.work_dir,
                    &action,
                    &mounts,
                    &request,
                )?;
                protocol::parse_state_response(&self.resource.name, &self.resource.resource_type, doc)?
            }
        };

        self.apply(report);
        let status = self.status.unwrap_or(Status::Missing);
        tracing::debug!(resource = %self.resource.name, %status, actions = self.actions.len(), "resolved");

        if self.resource.readonly && status != Status::Valid {
            return Err(Error::ReadOnly {
                resource: self.resource.name.clone(),
                status: status.to_string(),
            });
        }
        if let Some(reason) = &self.reason {
            return Err(Error::Invalid {
                resource: self.resource.name.clone(),
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    fn apply(&mut self, report: StateReport) {
        self.status = Some(report.status());
        self.actions.clear();
        self.properties = None;
        self.stale_properties = None;
        self.reason = None;
        match report {
            StateReport::Valid { properties } => self.properties = Some(properties),
            StateReport::Missing {
                actions,
                stale_properties,
            }
            | StateReport::Stale {
                actions,
                stale_properties,
            } => {
                self.actions = actions;
                self.stale_properties = stale_properties;
            }
            StateReport::Invalid { reason } => self.reason = Some(reason),
        }
    }

    // ========================================================================
    // execute
    // ========================================================================

    /// Run every pending action in order. Each action receives the state
    /// request, built from `dependencies` as they are now, plus the last
    /// `staleProperties`.
    pub fn execute(
        &self,
        invoker: &Invoker<'_>,
        workspace: &Path,
        dependencies: Map<String, Value>,
        events: &EventLog,
        console: &Console,
    ) -> Result<()> {
        let mut request = self.request(Value::Object(dependencies));
        if let (Some(stale), Some(obj)) = (&self.stale_properties, request.as_object_mut()) {
            obj.insert("staleProperties".into(), stale.clone());
        }
        let mounts = self.mounts(workspace);

        for action in &self.actions {
            console.info(&action.description);
            let started = Instant::now();
            let stdout = invoker.run_expecting_text(
                &self.resource.name,
                &self.work_dir,
                action,
                &mounts,
                &request,
            )?;
            let elapsed = started.elapsed().as_secs_f64();
            for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
                console.nested().detail(line);
            }
            events.append(RunEvent::ActionExecuted {
                resource: self.resource.name.clone(),
                action: action.name.clone(),
                duration_seconds: elapsed,
            })?;
        }
        Ok(())
    }
}

/// Check `config` against a plugin-supplied JSON Schema.
fn validate_config(resource: &str, schema: &Value, config: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| Error::protocol(resource, format!("invalid config_schema: {}", e)))?;
    let violations: Vec<String> = validator
        .iter_errors(config)
        .map(|err| {
            let at = err.instance_path.to_string();
            if at.is_empty() {
                err.to_string()
            } else {
                format!("{}: {}", at, err)
            }
        })
        .collect();
    if violations.is_empty() {
        return Ok(());
    }
    Err(Error::resource_config(
        resource,
        format!(
            "config does not match the plugin's schema:\n  - {}",
            violations.join("\n  - ")
        ),
    ))
}
