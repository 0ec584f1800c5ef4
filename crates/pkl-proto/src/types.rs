//! Value types shared by several messages.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Declaration of a host-side resource reader, as sent to the evaluator.
///
/// The evaluator matches `read("scheme:...")` expressions against the
/// declared scheme and calls back into the host for the contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceReaderSpec {
    /// URI scheme this reader answers for, without the trailing `:`.
    pub scheme: String,
    /// Whether URIs of this scheme have hierarchy (host, path, query).
    pub has_hierarchical_uris: bool,
    /// Whether `read*` glob expressions are supported.
    pub is_globbable: bool,
}

/// Declaration of a host-side module reader, as sent to the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleReaderSpec {
    /// URI scheme this reader answers for, without the trailing `:`.
    pub scheme: String,
    /// Whether URIs of this scheme have hierarchy (host, path, query).
    pub has_hierarchical_uris: bool,
    /// Whether `import*`/`glob*` expressions are supported.
    pub is_globbable: bool,
    /// Whether modules are local to the runtime (enables triple-dot imports).
    pub is_local: bool,
}

/// One entry of a directory-like listing returned by `listElements`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathElement {
    /// Name of the element, without any path separators.
    pub name: String,
    /// Whether the element is a directory.
    pub is_directory: bool,
}

impl PathElement {
    #[must_use]
    pub fn new(name: impl Into<String>, is_directory: bool) -> Self {
        Self {
            name: name.into(),
            is_directory,
        }
    }
}

/// An external reader subprocess the evaluator spawns on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalReaderSpec {
    /// Executable to spawn.
    pub executable: String,
    /// Arguments passed to the executable.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

/// Package checksums for a remote dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Checksums {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

/// A project or one of its dependencies, in wire form.
///
/// The root project carries `project_file_uri` and `dependencies`; local
/// dependencies additionally carry `dependency_type = "local"` and nest
/// their own graph, remote ones carry `"remote"` plus checksums.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectOrDependency {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub package_uri: String,
    #[serde(rename = "type")]
    pub dependency_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub project_file_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksums: Option<Checksums>,
    pub dependencies: HashMap<String, ProjectOrDependency>,
}

/// HTTP settings for the evaluator. Requires Pkl 0.26 or higher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Http {
    /// PEM-encoded CA certificates to trust, replacing the default store.
    #[serde(with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    pub ca_certificates: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<Proxy>,
    /// URI-prefix rewrite rules. Requires Pkl 0.29 or higher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrites: Option<HashMap<String, String>>,
}

/// HTTP proxy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Proxy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<Vec<String>>,
}

/// Rendering mode for `trace()` output. Requires Pkl 0.30 or higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceMode {
    Compact,
    Pretty,
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compact => write!(f, "compact"),
            Self::Pretty => write!(f, "pretty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_element_new() {
        let elem = PathElement::new("fred.pkl", false);
        assert_eq!(elem.name, "fred.pkl");
        assert!(!elem.is_directory);
    }

    #[test]
    fn trace_mode_display() {
        assert_eq!(TraceMode::Compact.to_string(), "compact");
        assert_eq!(TraceMode::Pretty.to_string(), "pretty");
    }
}
