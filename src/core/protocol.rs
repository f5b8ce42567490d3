//! Plugin protocol documents: init and state responses.
//!
//! Responses are deserialized into strict serde types (unknown keys are
//! rejected) and then checked for the status/properties/actions combination.
//! The resulting `StateReport` can only represent well-formed outcomes.

use super::types::{Action, Status};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Init
// ============================================================================

/// Response to the `init` action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct InitResponse {
    /// JSON Schema the resource's `config` must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,

    /// Plugs the plugin wants mounted, keyed by plug name
    #[serde(default)]
    pub plugs: IndexMap<String, PlugRequest>,

    /// Dependencies the plugin accepts, keyed by alias
    #[serde(default)]
    pub dependencies: IndexMap<String, DependencyRequest>,

    /// Action used to resolve state (defaults to `state` on the same image)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_action: Option<ActionSpec>,
}

/// A plug requested by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PlugRequest {
    /// Mount point inside the plugin container
    pub container_path: String,

    /// Skip with a warning instead of failing when unavailable
    #[serde(default)]
    pub optional: bool,

    /// Require a writable mount
    #[serde(default = "default_true")]
    pub writable: bool,
}

fn default_true() -> bool {
    true
}

/// A dependency alias accepted by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DependencyRequest {
    /// Required resource type (tag ignored)
    #[serde(rename = "type")]
    pub dependency_type: String,

    #[serde(default)]
    pub optional: bool,
}

/// An action as described by a plugin; missing fields take defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ActionSpec {
    /// Fill defaults. Returns `None` when no name is given and no default exists.
    pub fn into_action(
        self,
        default_name: Option<&str>,
        default_image: &str,
        describe: impl FnOnce(&str) -> String,
    ) -> Option<Action> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .or_else(|| default_name.map(str::to_string))?;
        let description = self.description.unwrap_or_else(|| describe(&name));
        Some(Action {
            description,
            image: self.image.unwrap_or_else(|| default_image.to_string()),
            entrypoint: self.entrypoint,
            args: self.args,
            name,
        })
    }
}

/// Parse an init response.
pub fn parse_init_response(resource: &str, doc: Value) -> Result<InitResponse> {
    let payload = doc.to_string();
    serde_json::from_value(doc).map_err(|e| {
        Error::protocol(resource, format!("invalid init response ({}): {}", e, payload))
    })
}

// ============================================================================
// State
// ============================================================================

/// Response to the state action, as sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StateResponse {
    pub status: Status,

    /// Actual state (VALID only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,

    /// Corrective actions (MISSING/STALE only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ActionSpec>>,

    /// Best-effort snapshot of current state (MISSING/STALE only)
    #[serde(
        rename = "staleProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stale_properties: Option<Value>,

    /// Why the resource cannot be repaired (INVALID only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A validated state outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum StateReport {
    Valid {
        properties: Map<String, Value>,
    },
    Missing {
        actions: Vec<Action>,
        stale_properties: Option<Value>,
    },
    Stale {
        actions: Vec<Action>,
        stale_properties: Option<Value>,
    },
    Invalid {
        reason: String,
    },
}

impl StateReport {
    pub fn status(&self) -> Status {
        match self {
            Self::Valid { .. } => Status::Valid,
            Self::Missing { .. } => Status::Missing,
            Self::Stale { .. } => Status::Stale,
            Self::Invalid { .. } => Status::Invalid,
        }
    }
}

/// Parse and validate a state response. `default_image` fills in actions
/// that do not name an image.
pub fn parse_state_response(resource: &str, default_image: &str, doc: Value) -> Result<StateReport> {
    let payload = doc.to_string();
    let violation = |msg: &str| Error::protocol(resource, format!("{}: {}", msg, payload));

    let response: StateResponse = serde_json::from_value(doc).map_err(|e| {
        Error::protocol(resource, format!("invalid state response ({}): {}", e, payload))
    })?;

    match response.status {
        Status::Valid => {
            if response.actions.is_some() {
                return Err(violation("VALID state must not include actions"));
            }
            if response.reason.is_some() {
                return Err(violation("VALID state must not include reason"));
            }
            // staleProperties on VALID is tolerated and dropped
            let properties = response
                .properties
                .ok_or_else(|| violation("VALID state must include properties"))?;
            Ok(StateReport::Valid { properties })
        }
        Status::Missing | Status::Stale => {
            if response.properties.is_some() {
                return Err(violation(&format!(
                    "{} state must not include properties",
                    response.status
                )));
            }
            if response.reason.is_some() {
                return Err(violation(&format!(
                    "{} state must not include reason",
                    response.status
                )));
            }
            let specs = response.actions.unwrap_or_default();
            if specs.is_empty() {
                return Err(violation(&format!(
                    "{} state must include one or more actions",
                    response.status
                )));
            }
            let mut actions = Vec::with_capacity(specs.len());
            for (idx, spec) in specs.into_iter().enumerate() {
                let action = spec
                    .into_action(None, default_image, |name| format!("Execute '{}'", name))
                    .ok_or_else(|| violation(&format!("action #{} has no name", idx + 1)))?;
                actions.push(action);
            }
            let stale_properties = response.stale_properties;
            if response.status == Status::Missing {
                Ok(StateReport::Missing {
                    actions,
                    stale_properties,
                })
            } else {
                Ok(StateReport::Stale {
                    actions,
                    stale_properties,
                })
            }
        }
        Status::Invalid => {
            if response.properties.is_some() || response.actions.is_some() {
                return Err(violation(
                    "INVALID state must not include properties or actions",
                ));
            }
            match response.reason {
                Some(reason) if !reason.trim().is_empty() => Ok(StateReport::Invalid { reason }),
                _ => Err(violation("INVALID state must include a reason")),
            }
        }
    }
}

// ============================================================================
// Schemas
// ============================================================================

/// Documents whose JSON Schema can be printed for plugin and manifest authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchemaKind {
    InitResponse,
    StateResponse,
    Manifest,
}

/// Pretty-printed JSON Schema for a document kind.
pub fn schema_json(kind: SchemaKind) -> Result<String> {
    let schema = match kind {
        SchemaKind::InitResponse => schemars::schema_for!(InitResponse),
        SchemaKind::StateResponse => schemars::schema_for!(StateResponse),
        SchemaKind::Manifest => schemars::schema_for!(super::types::ManifestDocument),
    };
    serde_json::to_string_pretty(&schema)
        .map_err(|e| Error::Runtime(format!("cannot serialize schema: {}", e)))
}
