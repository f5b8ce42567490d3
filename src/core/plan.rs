//! Plan: bootstrap, resolve, display, execute.
//!
//! Resolution runs fixpoint passes over the resources in manifest order. A
//! resource resolves once all of its dependencies have, so the deployment
//! sequence (non-VALID resources in the order they first resolved) always
//! lists dependencies before their dependents. A pass that makes no progress
//! means the remaining resources wait on each other.

use super::eventlog::{generate_run_id, EventLog, RunEvent};
use super::invoker::Invoker;
use super::manifest::Manifest;
use super::resource::{DependencyView, ResourceState};
use super::types::Status;
use crate::console::Console;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Where a plan keeps its files and what it does before initializing.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Scratch directory owned by the run; cleared at bootstrap.
    pub work_dir: PathBuf,
    /// Directory mounted into every plugin as the workspace.
    pub workspace: PathBuf,
    /// Pull every resource image before initializing.
    pub pull: bool,
}

pub struct Plan<'r> {
    manifest: Manifest,
    states: IndexMap<String, ResourceState>,
    sequence: IndexSet<String>,
    invoker: Invoker<'r>,
    options: PlanOptions,
    events: EventLog,
    run_id: String,
}

impl<'r> Plan<'r> {
    pub fn new(manifest: Manifest, runtime: &'r dyn Runtime, options: PlanOptions) -> Self {
        let states = manifest
            .resources()
            .values()
            .map(|r| (r.name.clone(), ResourceState::new(r.clone(), &options.work_dir)))
            .collect();
        Self {
            events: EventLog::new(&options.work_dir),
            manifest,
            states,
            sequence: IndexSet::new(),
            invoker: Invoker::new(runtime),
            options,
            run_id: generate_run_id(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn state(&self, name: &str) -> Option<&ResourceState> {
        self.states.get(name)
    }

    pub fn states(&self) -> impl Iterator<Item = &ResourceState> {
        self.states.values()
    }

    /// Resources needing work, in execution order.
    pub fn sequence(&self) -> impl Iterator<Item = &ResourceState> {
        self.sequence.iter().filter_map(|name| self.states.get(name))
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    // ========================================================================
    // bootstrap
    // ========================================================================

    /// Check the runtime, reset the work directory, pull images and
    /// initialize every resource.
    pub fn bootstrap(&mut self, console: &Console) -> Result<()> {
        let runtime = self.invoker.runtime();
        runtime.check()?;
        tracing::debug!(runtime = runtime.name(), "runtime available");

        reset_work_dir(&self.options.work_dir, &self.options.workspace)?;
        self.events.append(RunEvent::RunStarted {
            run_id: self.run_id.clone(),
            manifest_digest: self.manifest.digest(),
            resources: self.states.len(),
        })?;

        if self.options.pull {
            for image in self.manifest.images() {
                console.info(&format!("Pulling {}", image));
                runtime.pull(image)?;
            }
        }

        let nested = console.nested();
        for state in self.states.values_mut() {
            nested.detail(&format!("initializing {}", state.name()));
            state.initialize(&self.invoker, &self.manifest, &self.options.workspace, console)?;
        }
        Ok(())
    }

    // ========================================================================
    // resolve
    // ========================================================================

    /// Resolve every resource, dependencies first.
    pub fn resolve(&mut self, console: &Console) -> Result<()> {
        let names: Vec<String> = self.states.keys().cloned().collect();
        let mut unresolved = self.unresolved().len();
        let mut pass = 0;

        while unresolved > 0 {
            pass += 1;
            tracing::debug!(pass, unresolved, "resolution pass");
            for name in &names {
                if self.states.get(name).is_some_and(|s| s.status().is_some()) {
                    continue;
                }
                let view = self.dependency_view(name);
                let Some(state) = self.states.get_mut(name) else {
                    continue;
                };
                state.resolve(&self.invoker, view, false, &self.options.workspace)?;
                if let Some(status) = state.status() {
                    console.detail(&format!("{} is {}", name, status));
                    self.events.append(RunEvent::ResourceResolved {
                        resource: name.clone(),
                        status,
                        actions: state.actions().len(),
                    })?;
                    if status != Status::Valid {
                        self.sequence.insert(name.clone());
                    }
                }
            }

            let stalled = self.unresolved();
            if stalled.len() == unresolved {
                return Err(Error::Cycle(stalled));
            }
            unresolved = stalled.len();
        }
        Ok(())
    }

    fn unresolved(&self) -> Vec<String> {
        self.states
            .values()
            .filter(|s| s.status().is_none())
            .map(|s| s.name().to_string())
            .collect()
    }

    /// How `name`'s dependencies look right now. Pending beats missing: a
    /// resource only cascades once every dependency has a status.
    fn dependency_view(&self, name: &str) -> DependencyView {
        let Some(state) = self.states.get(name) else {
            return DependencyView::Ready(Map::new());
        };
        let mut missing = None;
        for (alias, target) in state.dependencies() {
            match self.states.get(target).and_then(|s| s.status()) {
                None => return DependencyView::Pending(alias.clone()),
                Some(Status::Missing) if missing.is_none() => missing = Some(alias.clone()),
                Some(_) => {}
            }
        }
        if let Some(alias) = missing {
            return DependencyView::Missing(alias);
        }
        DependencyView::Ready(self.dependency_snapshots(state))
    }

    fn dependency_snapshots(&self, state: &ResourceState) -> Map<String, Value> {
        state
            .dependencies()
            .iter()
            .filter_map(|(alias, target)| {
                self.states
                    .get(target)
                    .map(|dep| (alias.clone(), dep.snapshot(self.dependency_snapshots(dep))))
            })
            .collect()
    }

    // ========================================================================
    // display
    // ========================================================================

    pub fn display(&self, console: &Console) {
        if self.sequence.is_empty() {
            console.success("nothing to do");
            return;
        }
        console.header("Deployment plan:");
        let items = console.nested();
        for state in self.sequence() {
            let r = state.resource();
            items.line(&format!(
                "{} {} ({})",
                items.status_icon(state.status()),
                r.name,
                r.resource_type
            ));
            let details = items.nested();
            if state.actions().is_empty() {
                details.dim("waits for a missing dependency, re-checked before execution");
            }
            for action in state.actions() {
                details.line(&format!("- {}", action.description));
            }
            if let Some(stale) = state.stale_properties() {
                details.detail(&format!("current: {}", stale));
            }
        }
    }

    // ========================================================================
    // execute
    // ========================================================================

    /// Run the deployment sequence, confirming convergence after each resource.
    pub fn execute(&mut self, console: &Console) -> Result<()> {
        let started = Instant::now();
        let sequence: Vec<String> = self.sequence.iter().cloned().collect();
        let mut executed = 0;

        for name in &sequence {
            if self.states.get(name).is_some_and(|s| s.actions().is_empty()) {
                self.force_resolve(name)?;
                if self.status_of(name) == Some(Status::Valid) {
                    console.success(&format!("{} is already up to date", name));
                    continue;
                }
            }

            console.header(&format!("{}:", name));
            let nested = console.nested();
            if let Some(state) = self.states.get(name) {
                let dependencies = self.dependency_snapshots(state);
                state.execute(
                    &self.invoker,
                    &self.options.workspace,
                    dependencies,
                    &self.events,
                    &nested,
                )?;
            }
            executed += 1;

            self.force_resolve(name)?;
            match self.status_of(name) {
                Some(Status::Valid) => nested.success(&format!("{} is up to date", name)),
                other => {
                    return Err(Error::NotConverged {
                        resource: name.clone(),
                        status: other.map_or_else(|| "unresolved".to_string(), |s| s.to_string()),
                    })
                }
            }
        }

        self.events.append(RunEvent::RunCompleted {
            run_id: self.run_id.clone(),
            resources_executed: executed,
            total_seconds: started.elapsed().as_secs_f64(),
        })?;
        Ok(())
    }

    fn force_resolve(&mut self, name: &str) -> Result<()> {
        let view = self.dependency_view(name);
        if let Some(state) = self.states.get_mut(name) {
            state.resolve(&self.invoker, view, true, &self.options.workspace)?;
        }
        Ok(())
    }

    fn status_of(&self, name: &str) -> Option<Status> {
        self.states.get(name).and_then(|s| s.status())
    }
}

/// Clear and recreate the work directory. Refuses when that would delete
/// the workspace.
fn reset_work_dir(work_dir: &Path, workspace: &Path) -> Result<()> {
    let work = canonical(work_dir)?;
    let ws = canonical(workspace)?;
    if ws.starts_with(&work) {
        return Err(Error::Config(format!(
            "work directory {} must not be or contain the workspace {}",
            work.display(),
            ws.display()
        )));
    }
    if work_dir.exists() {
        std::fs::remove_dir_all(work_dir)?;
    }
    std::fs::create_dir_all(work_dir)?;
    Ok(())
}

fn canonical(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        Ok(path.canonicalize()?)
    } else {
        Ok(std::path::absolute(path)?)
    }
}
