//! Manifest document types and the runtime model derived from them.
//!
//! Document types (`ManifestDocument`, `PlugDecl`, `ResourceDecl`) mirror what
//! users write and derive Serialize/Deserialize/JsonSchema. Runtime types
//! (`Resource`, `Plug`, `Action`) are what the engine works with once the
//! documents are merged.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Manifest documents
// ============================================================================

/// One manifest file: plugs and resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ManifestDocument {
    /// Host paths offered to plugin containers
    #[serde(default)]
    pub plugs: IndexMap<String, PlugDecl>,

    /// Desired resources (order-preserving)
    #[serde(default)]
    pub resources: IndexMap<String, ResourceDecl>,
}

/// A plug as declared in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PlugDecl {
    /// Host path (relative paths resolve against the manifest's directory)
    pub path: String,

    /// Never mount writable
    #[serde(default)]
    pub read_only: bool,

    /// Regexes matched against resource names
    #[serde(default)]
    pub resource_names: Vec<String>,

    /// Regexes matched against resource types
    #[serde(default)]
    pub resource_types: Vec<String>,
}

/// A resource as declared in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    /// Plugin image reference, optionally tagged
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Block corrective actions
    #[serde(default)]
    pub readonly: bool,

    /// Desired-state document handed to the plugin
    #[serde(default)]
    pub config: Value,

    /// alias → resource name
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
}

// ============================================================================
// Runtime model
// ============================================================================

/// A declared resource, immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub resource_type: String,
    pub readonly: bool,
    pub config: Value,
    pub dependencies: IndexMap<String, String>,
}

impl Resource {
    pub fn from_decl(name: &str, decl: ResourceDecl) -> Self {
        let config = match decl.config {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        Self {
            name: name.to_string(),
            resource_type: decl.resource_type,
            readonly: decl.readonly,
            config,
            dependencies: decl.dependencies,
        }
    }

    /// Resource type without its `:tag`.
    pub fn untagged_type(&self) -> &str {
        strip_tag(&self.resource_type)
    }
}

/// Strip a trailing `:tag` from an image reference.
///
/// A colon followed by a path segment is a registry port, not a tag, so
/// `registry:5000/img` is returned unchanged.
pub fn strip_tag(image: &str) -> &str {
    match image.rfind(':') {
        Some(idx) if !image[idx + 1..].contains('/') => &image[..idx],
        _ => image,
    }
}

/// A host path that plugin containers may mount.
#[derive(Debug, Clone)]
pub struct Plug {
    pub name: String,
    pub host_path: PathBuf,
    pub read_only: bool,
    name_patterns: Vec<Regex>,
    type_patterns: Vec<Regex>,
}

impl Plug {
    /// Build a plug, compiling its patterns. Patterns match the whole name/type.
    pub fn new(
        name: &str,
        host_path: PathBuf,
        read_only: bool,
        resource_names: &[String],
        resource_types: &[String],
    ) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                        Error::Config(format!("plug '{}' has invalid pattern '{}': {}", name, p, e))
                    })
                })
                .collect()
        };
        Ok(Self {
            name: name.to_string(),
            host_path,
            read_only,
            name_patterns: compile(resource_names)?,
            type_patterns: compile(resource_types)?,
        })
    }

    /// Whether this plug may be offered to the given resource.
    pub fn allows(&self, resource: &Resource) -> bool {
        if self.name_patterns.is_empty() && self.type_patterns.is_empty() {
            return true;
        }
        self.name_patterns.iter().any(|p| p.is_match(&resource.name))
            || self
                .type_patterns
                .iter()
                .any(|p| p.is_match(&resource.resource_type))
    }
}

/// One invocable unit of the protocol: init, state query, or a
/// corrective action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub description: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Action {
    /// Arguments passed to the plugin. An action without explicit args is
    /// invoked with its own name as the single argument.
    pub fn effective_args(&self) -> Vec<String> {
        if self.args.is_empty() {
            vec![self.name.clone()]
        } else {
            self.args.clone()
        }
    }
}

/// Resolution outcome of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Missing,
    Stale,
    Valid,
    Invalid,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "MISSING"),
            Self::Stale => write!(f, "STALE"),
            Self::Valid => write!(f, "VALID"),
            Self::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Render a YAML value as template text.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
