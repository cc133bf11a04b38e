//! VM specification - the desired state handed to the domain manager.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Namespace used when a spec does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid spec JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("VM name must not be empty")]
    EmptyName,

    #[error("VM name {0} is ambiguous: hypervisors also resolve ids and UUIDs")]
    AmbiguousName(String),

    #[error("domain name {definition} does not match VM name {identity}")]
    NameMismatch { identity: String, definition: String },
}

/// Cluster-wide identity of a VM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmIdentity {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl VmIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Name the hypervisor knows the domain by.
    pub fn domain_name(&self) -> &str {
        &self.name
    }

    /// Check that the name resolves to exactly one domain.
    ///
    /// libvirt lookups accept a numeric domain id or a UUID in place of a
    /// name, so names of either shape could resolve to an unrelated domain.
    pub fn validate(&self) -> Result<(), SpecError> {
        let name = self.name.as_str();
        if name.is_empty() {
            return Err(SpecError::EmptyName);
        }
        if name.bytes().all(|b| b.is_ascii_digit()) || Uuid::parse_str(name).is_ok() {
            return Err(SpecError::AmbiguousName(name.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Disk attached to a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    pub path: String,
    #[serde(default)]
    pub readonly: bool,
}

/// Network interface attached to a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicConfig {
    /// Host bridge to plug the interface into.
    #[serde(default)]
    pub bridge: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
}

/// Hypervisor-facing description of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDefinition {
    /// Empty means "same as the VM name".
    #[serde(default)]
    pub name: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub kernel: Option<String>,
    #[serde(default)]
    pub cmdline: Option<String>,
    #[serde(default)]
    pub disks: Vec<DiskConfig>,
    #[serde(default)]
    pub nics: Vec<NicConfig>,
}

impl DomainDefinition {
    /// Smallest bootable definition: 1 vCPU, 64 MiB, no devices.
    pub fn minimal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vcpus: 1,
            memory_mb: 64,
            kernel: None,
            cmdline: None,
            disks: Vec::new(),
            nics: Vec::new(),
        }
    }
}

/// Desired state of one VM. Immutable for the duration of a reconciliation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub identity: VmIdentity,
    pub definition: DomainDefinition,
}

impl VmSpec {
    /// Minimal spec for `name` in the default namespace.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            identity: VmIdentity::new(DEFAULT_NAMESPACE, name.clone()),
            definition: DomainDefinition::minimal(name),
        }
    }

    /// Parse and validate a spec from JSON.
    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        let mut spec: VmSpec = serde_json::from_str(json)?;
        spec.normalize()?;
        Ok(spec)
    }

    /// Read a spec from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Fill in the domain name and reject specs that would never converge.
    pub fn normalize(&mut self) -> Result<(), SpecError> {
        self.identity.validate()?;
        if self.definition.name.is_empty() {
            self.definition.name = self.identity.name.clone();
        }
        self.validate()
    }

    /// Check a spec without modifying it. An empty definition name stands
    /// for the VM name.
    ///
    /// A domain defined under another name would not be found by the next
    /// lookup, so the definition name must match the VM name.
    pub fn validate(&self) -> Result<(), SpecError> {
        self.identity.validate()?;
        let defined = self.definition.name.as_str();
        if !defined.is_empty() && defined != self.identity.domain_name() {
            return Err(SpecError::NameMismatch {
                identity: self.identity.name.clone(),
                definition: self.definition.name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_spec() {
        let spec = VmSpec::new("testvm");
        assert_eq!(spec.identity.to_string(), "default/testvm");
        assert_eq!(spec.identity.domain_name(), "testvm");
        assert_eq!(spec.definition.name, "testvm");
        assert_eq!(spec.definition.vcpus, 1);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let spec = VmSpec::from_json(
            r#"{
                "identity": { "name": "web-1" },
                "definition": {
                    "vcpus": 2,
                    "memory_mb": 2048,
                    "disks": [{ "path": "/dev/zvol/mvirt/volumes/web-1" }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(spec.identity.namespace, DEFAULT_NAMESPACE);
        assert_eq!(spec.definition.name, "web-1");
        assert_eq!(spec.definition.disks.len(), 1);
        assert!(!spec.definition.disks[0].readonly);
        assert!(spec.definition.nics.is_empty());
    }

    #[test]
    fn test_rejects_empty_name() {
        let err = VmSpec::from_json(
            r#"{ "identity": { "name": "" }, "definition": { "vcpus": 1, "memory_mb": 64 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::EmptyName));
    }

    #[test]
    fn test_rejects_name_mismatch() {
        let err = VmSpec::from_json(
            r#"{
                "identity": { "namespace": "prod", "name": "db" },
                "definition": { "name": "other", "vcpus": 1, "memory_mb": 64 }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::NameMismatch { .. }));
    }

    #[test]
    fn test_validate_checks_specs_built_in_code() {
        let mut spec = VmSpec::new("db");
        spec.validate().unwrap();

        spec.definition.name.clear();
        spec.validate().unwrap();

        spec.definition = DomainDefinition::minimal("other");
        assert!(matches!(
            spec.validate(),
            Err(SpecError::NameMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_names_libvirt_resolves_as_ids() {
        for name in ["42", "0", "4f2a9c1e-5b3d-4e6f-8a7b-9c0d1e2f3a4b"] {
            let err = VmSpec::new(name).validate().unwrap_err();
            assert!(matches!(err, SpecError::AmbiguousName(ref n) if n == name));
        }

        let err = VmSpec::from_json(
            r#"{ "identity": { "name": "1234" }, "definition": { "vcpus": 1, "memory_mb": 64 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::AmbiguousName(_)));

        for name in ["web-1", "vm42", "42a"] {
            VmSpec::new(name).validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm.json");
        let spec = VmSpec::new("from-file");
        std::fs::write(&path, serde_json::to_string(&spec).unwrap()).unwrap();

        let loaded = VmSpec::load(&path).await.unwrap();
        assert_eq!(loaded, spec);
    }
}
