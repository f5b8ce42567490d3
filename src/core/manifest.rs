//! Manifest loading: template → parse → merge.
//!
//! Several manifest files combine into one `Manifest`. Plug and resource
//! names are global; declaring the same name twice is an error, never an
//! override. Dependency wiring is captured as written and checked later,
//! when each resource's plugin declares what it accepts.

use super::template::{self, Vars};
use super::types::{ManifestDocument, Plug, Resource};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The merged desired state of a run.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    plugs: IndexMap<String, Plug>,
    resources: IndexMap<String, Resource>,
    origins: HashMap<String, PathBuf>,
}

impl Manifest {
    /// Read, render and merge manifest files in order.
    pub fn load(paths: &[PathBuf], vars: &Vars) -> Result<Self> {
        let mut manifest = Self::default();
        for path in paths {
            let text = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("cannot read manifest {}: {}", path.display(), e))
            })?;
            let doc = parse_document(path, &text, vars)?;
            manifest.merge(path, doc)?;
        }
        Ok(manifest)
    }

    /// Merge one parsed document. `source` names the file in errors and
    /// anchors relative plug paths.
    pub fn merge(&mut self, source: &Path, doc: ManifestDocument) -> Result<()> {
        let base = source.parent().unwrap_or_else(|| Path::new(""));

        // Check the whole document before touching the manifest.
        let mut plugs = Vec::with_capacity(doc.plugs.len());
        for (name, decl) in doc.plugs {
            if let Some(first) = self.origins.get(&plug_key(&name)) {
                return Err(Error::Config(format!(
                    "plug '{}' is declared in both {} and {}",
                    name,
                    first.display(),
                    source.display()
                )));
            }
            let host_path = resolve_host_path(base, &decl.path)?;
            let plug = Plug::new(
                &name,
                host_path,
                decl.read_only,
                &decl.resource_names,
                &decl.resource_types,
            )?;
            plugs.push((name, plug));
        }

        let mut resources = Vec::with_capacity(doc.resources.len());
        for (name, decl) in doc.resources {
            if let Some(first) = self.origins.get(&resource_key(&name)) {
                return Err(Error::Config(format!(
                    "resource '{}' is declared in both {} and {}",
                    name,
                    first.display(),
                    source.display()
                )));
            }
            if decl.resource_type.trim().is_empty() {
                return Err(Error::Config(format!(
                    "{}: resource '{}' has an empty type",
                    source.display(),
                    name
                )));
            }
            let resource = Resource::from_decl(&name, decl);
            resources.push((name, resource));
        }

        for (name, plug) in plugs {
            self.origins.insert(plug_key(&name), source.to_path_buf());
            self.plugs.insert(name, plug);
        }
        for (name, resource) in resources {
            self.origins.insert(resource_key(&name), source.to_path_buf());
            self.resources.insert(name, resource);
        }
        Ok(())
    }

    pub fn plugs(&self) -> &IndexMap<String, Plug> {
        &self.plugs
    }

    pub fn plug(&self, name: &str) -> Option<&Plug> {
        self.plugs.get(name)
    }

    pub fn resources(&self) -> &IndexMap<String, Resource> {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// Distinct resource images, in declaration order.
    pub fn images(&self) -> Vec<&str> {
        let mut images: Vec<&str> = Vec::new();
        for r in self.resources.values() {
            if !images.contains(&r.resource_type.as_str()) {
                images.push(&r.resource_type);
            }
        }
        images
    }

    /// BLAKE3 digest of the merged desired state. Returns `"blake3:{hex}"`.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (name, plug) in &self.plugs {
            hasher.update(b"plug\0");
            hasher.update(name.as_bytes());
            hasher.update(b"\0");
            hasher.update(plug.host_path.to_string_lossy().as_bytes());
            hasher.update(if plug.read_only { b"\0ro\n" } else { b"\0rw\n" });
        }
        for (name, r) in &self.resources {
            hasher.update(b"resource\0");
            hasher.update(name.as_bytes());
            hasher.update(b"\0");
            hasher.update(r.resource_type.as_bytes());
            hasher.update(if r.readonly { b"\0ro\0" } else { b"\0rw\0" });
            hasher.update(r.config.to_string().as_bytes());
            for (alias, target) in &r.dependencies {
                hasher.update(b"\0");
                hasher.update(alias.as_bytes());
                hasher.update(b"=");
                hasher.update(target.as_bytes());
            }
            hasher.update(b"\n");
        }
        format!("blake3:{}", hasher.finalize().to_hex())
    }
}

fn plug_key(name: &str) -> String {
    format!("plug:{}", name)
}

fn resource_key(name: &str) -> String {
    format!("resource:{}", name)
}

fn resolve_host_path(base: &Path, path: &str) -> Result<PathBuf> {
    let raw = Path::new(path);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.join(raw)
    };
    std::path::absolute(&joined)
        .map_err(|e| Error::Config(format!("invalid plug path {}: {}", path, e)))
}

/// Render and parse one manifest file.
pub fn parse_document(source: &Path, text: &str, vars: &Vars) -> Result<ManifestDocument> {
    let rendered = template::render_manifest(source, text, vars)?;
    if rendered.trim().is_empty() {
        return Ok(ManifestDocument::default());
    }
    serde_yaml_ng::from_str(&rendered)
        .map_err(|e| Error::Config(format!("{}: {}", source.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(yaml: &str) -> ManifestDocument {
        parse_document(Path::new("test.yaml"), yaml, &Vars::new()).unwrap()
    }

    #[test]
    fn test_merge_two_documents() {
        let mut m = Manifest::default();
        m.merge(
            Path::new("/infra/net.yaml"),
            doc("resources:\n  net:\n    type: plugins/net\n"),
        )
        .unwrap();
        m.merge(
            Path::new("/infra/vm.yaml"),
            doc("resources:\n  vm:\n    type: plugins/vm\n    dependencies:\n      network: net\n"),
        )
        .unwrap();
        let names: Vec<_> = m.resources().keys().collect();
        assert_eq!(names, vec!["net", "vm"]);
        assert_eq!(m.resource("vm").unwrap().dependencies["network"], "net");
        assert_eq!(m.resource("net").unwrap().config, json!({}));
    }

    #[test]
    fn test_duplicate_resource_across_documents() {
        let mut m = Manifest::default();
        m.merge(Path::new("a.yaml"), doc("resources:\n  net:\n    type: x\n")).unwrap();
        let err = m
            .merge(Path::new("b.yaml"), doc("resources:\n  net:\n    type: y\n"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("resource 'net'"));
        assert!(msg.contains("a.yaml"));
        assert!(msg.contains("b.yaml"));
        assert_eq!(m.resource("net").unwrap().resource_type, "x");
    }

    #[test]
    fn test_duplicate_plug_across_documents() {
        let mut m = Manifest::default();
        m.merge(Path::new("a.yaml"), doc("plugs:\n  p:\n    path: /a\n")).unwrap();
        let err = m
            .merge(Path::new("b.yaml"), doc("plugs:\n  p:\n    path: /b\n"))
            .unwrap_err();
        assert!(err.to_string().contains("plug 'p'"));
    }

    #[test]
    fn test_failed_merge_leaves_manifest_unchanged() {
        let mut m = Manifest::default();
        m.merge(Path::new("a.yaml"), doc("resources:\n  net:\n    type: x\n")).unwrap();
        let err = m
            .merge(
                Path::new("b.yaml"),
                doc("plugs:\n  creds:\n    path: /c\nresources:\n  vm:\n    type: v\n  net:\n    type: y\n"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("resource 'net'"));
        assert!(m.plug("creds").is_none());
        assert!(m.resource("vm").is_none());
        assert_eq!(m.resources().len(), 1);

        // the same plug can still be declared once the conflict is gone
        m.merge(Path::new("c.yaml"), doc("plugs:\n  creds:\n    path: /c\n")).unwrap();
        assert!(m.plug("creds").is_some());
    }

    #[test]
    fn test_plug_and_resource_may_share_a_name() {
        let mut m = Manifest::default();
        m.merge(
            Path::new("a.yaml"),
            doc("plugs:\n  kube:\n    path: /k\nresources:\n  kube:\n    type: x\n"),
        )
        .unwrap();
        assert!(m.plug("kube").is_some());
        assert!(m.resource("kube").is_some());
    }

    #[test]
    fn test_relative_plug_path_anchored_to_manifest() {
        let mut m = Manifest::default();
        m.merge(Path::new("/infra/main.yaml"), doc("plugs:\n  creds:\n    path: secrets/gcp\n"))
            .unwrap();
        assert_eq!(m.plug("creds").unwrap().host_path, PathBuf::from("/infra/secrets/gcp"));
    }

    #[test]
    fn test_empty_type_rejected() {
        let mut m = Manifest::default();
        let err = m
            .merge(Path::new("a.yaml"), doc("resources:\n  r:\n    type: ''\n"))
            .unwrap_err();
        assert!(err.to_string().contains("empty type"));
    }

    #[test]
    fn test_load_renders_templates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.yaml");
        std::fs::write(
            &path,
            "resources:\n  net:\n    type: plugins/net:{{ version }}\n    config:\n      project: {{ gcp.project }}\n",
        )
        .unwrap();
        let mut vars = Vars::new();
        vars.set_assignment("version=1.2").unwrap();
        vars.set_assignment("gcp.project=acme").unwrap();
        let m = Manifest::load(&[path], &vars).unwrap();
        let net = m.resource("net").unwrap();
        assert_eq!(net.resource_type, "plugins/net:1.2");
        assert_eq!(net.config["project"], "acme");
    }

    #[test]
    fn test_load_undefined_variable_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "resources:\n  net:\n    type: {{ image }}\n").unwrap();
        let err = Manifest::load(&[path], &Vars::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("broken.yaml"));
        assert!(msg.contains("undefined variable: image"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load(&[PathBuf::from("/nonexistent/m.yaml")], &Vars::new()).unwrap_err();
        assert!(err.to_string().contains("cannot read manifest"));
    }

    #[test]
    fn test_empty_document() {
        let d = doc("   \n");
        assert!(d.resources.is_empty());
        assert!(d.plugs.is_empty());
    }

    #[test]
    fn test_images_distinct_in_order() {
        let mut m = Manifest::default();
        m.merge(
            Path::new("a.yaml"),
            doc("resources:\n  a:\n    type: i1\n  b:\n    type: i2\n  c:\n    type: i1\n"),
        )
        .unwrap();
        assert_eq!(m.images(), vec!["i1", "i2"]);
    }

    #[test]
    fn test_digest_changes_with_config() {
        let mut a = Manifest::default();
        a.merge(Path::new("a.yaml"), doc("resources:\n  n:\n    type: x\n    config: {k: 1}\n"))
            .unwrap();
        let mut b = Manifest::default();
        b.merge(Path::new("a.yaml"), doc("resources:\n  n:\n    type: x\n    config: {k: 2}\n"))
            .unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), a.clone().digest());
        assert!(a.digest().starts_with("blake3:"));
    }
}
