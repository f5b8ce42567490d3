//! Manifest templating: `{{ path.to.var }}` substitution against a variable
//! context, applied to raw manifest text before structural parsing.

use super::types::yaml_value_to_string;
use crate::error::{Error, Result};
use serde_yaml_ng::{Mapping, Value};
use std::path::Path;

/// Variables available to manifest templates.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    root: Mapping,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a YAML mapping into the context. Later values win; nested
    /// mappings are merged key by key.
    pub fn merge(&mut self, other: Mapping) {
        merge_mapping(&mut self.root, other);
    }

    /// Merge the contents of a YAML variables file.
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read variables file {}: {}", path.display(), e))
        })?;
        let value: Value = serde_yaml_ng::from_str(&content).map_err(|e| {
            Error::Config(format!("invalid variables file {}: {}", path.display(), e))
        })?;
        match value {
            Value::Mapping(m) => {
                self.merge(m);
                Ok(())
            }
            Value::Null => Ok(()),
            _ => Err(Error::Config(format!(
                "variables file {} must contain a mapping",
                path.display()
            ))),
        }
    }

    /// Set a single `key=value` assignment. Dotted keys create nested maps;
    /// the value is parsed as YAML so `replicas=3` yields a number.
    pub fn set_assignment(&mut self, assignment: &str) -> Result<()> {
        let (key, raw) = assignment.split_once('=').ok_or_else(|| {
            Error::Config(format!("invalid variable '{}': expected KEY=VALUE", assignment))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(format!(
                "invalid variable '{}': empty key",
                assignment
            )));
        }
        let value: Value =
            serde_yaml_ng::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        let value = if value.is_null() && !raw.trim().is_empty() {
            Value::String(raw.to_string())
        } else {
            value
        };

        let mut nested = value;
        for part in key.rsplit('.') {
            let mut m = Mapping::new();
            m.insert(Value::String(part.to_string()), nested);
            nested = Value::Mapping(m);
        }
        if let Value::Mapping(m) = nested {
            self.merge(m);
        }
        Ok(())
    }

    /// Look up a dotted path.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for part in parts {
            current = current.as_mapping()?.get(part)?;
        }
        Some(current)
    }
}

fn merge_mapping(into: &mut Mapping, other: Mapping) {
    for (k, v) in other {
        if let Value::Mapping(incoming) = v {
            if let Some(Value::Mapping(existing)) = into.get_mut(&k) {
                merge_mapping(existing, incoming);
                continue;
            }
            into.insert(k, Value::Mapping(incoming));
        } else {
            into.insert(k, v);
        }
    }
}

/// Render all `{{ ... }}` expressions in a template.
pub fn render(template: &str, vars: &Vars) -> std::result::Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();
        if key.is_empty() {
            return Err(format!("empty template expression at position {}", open));
        }

        let value = vars
            .lookup(key)
            .map(yaml_value_to_string)
            .ok_or_else(|| format!("undefined variable: {}", key))?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Render a manifest file's text, naming the file in any error.
pub fn render_manifest(source: &Path, text: &str, vars: &Vars) -> Result<String> {
    render(text, vars).map_err(|e| Error::Config(format!("{}: {}", source.display(), e)))
}
