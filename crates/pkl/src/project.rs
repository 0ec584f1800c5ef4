//! Project manifests (`PklProject`).
//!
//! A project is itself a Pkl value: the binding evaluates the manifest
//! through a throwaway evaluator and decodes the result. Local dependencies
//! nest complete manifests of their own; remote dependencies carry a package
//! URI and checksums. The dependency map is polymorphic on the wire, so it
//! is resolved through the decoder registry by qualified class name.

use std::collections::HashMap;
use std::sync::Once;

use pkl_proto::{Checksums, ExternalReaderSpec, ProjectOrDependency, TraceMode};
use serde::Deserialize;
use tracing::warn;

use crate::decoder::{from_value, registry, Duration, Object, Value};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::module_source::ModuleSource;

const PROJECT_CLASS: &str = "pkl.Project";
const REMOTE_DEPENDENCY_CLASS: &str = "pkl.Project#RemoteDependency";

static PROJECT_MAPPINGS: Once = Once::new();

fn ensure_project_mappings() {
    PROJECT_MAPPINGS.call_once(|| {
        registry::register_mapping::<ProjectRemoteDependency>(REMOTE_DEPENDENCY_CLASS);
    });
}

/// A loaded project manifest.
///
/// Assembled field by field in [`project_from_value`] rather than derived:
/// the `dependencies` property is polymorphic and `annotations` are
/// schemaless, so both need the dynamic value.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub package: Option<ProjectPackage>,
    pub project_file_uri: String,
    pub tests: Vec<String>,
    pub evaluator_settings: ProjectEvaluatorSettings,
    pub annotations: Vec<Object>,
    dependencies: ProjectDependencies,
}

impl Project {
    /// The project's resolved dependency graph.
    #[must_use]
    pub fn dependencies(&self) -> &ProjectDependencies {
        &self.dependencies
    }
}

/// Package metadata of a project.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectPackage {
    pub name: String,
    pub base_uri: String,
    pub version: String,
    pub package_zip_url: String,
    pub description: String,
    pub website: String,
    pub documentation: String,
    pub source_code: String,
    pub source_code_url_scheme: String,
    pub license: String,
    pub license_text: String,
    pub issue_tracker: String,
    pub uri: String,
    pub authors: Vec<String>,
    pub api_tests: Vec<String>,
    pub exclude: Vec<String>,
}

/// The `evaluatorSettings` block of a manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectEvaluatorSettings {
    pub external_properties: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub allowed_modules: Option<Vec<String>>,
    pub allowed_resources: Option<Vec<String>>,
    pub no_cache: Option<bool>,
    pub module_cache_dir: Option<String>,
    pub root_dir: Option<String>,
    pub module_path: Vec<String>,
    pub http: Option<ProjectHttpSettings>,
    pub external_module_readers: HashMap<String, ExternalReaderSpec>,
    pub external_resource_readers: HashMap<String, ExternalReaderSpec>,
    pub trace_mode: Option<TraceMode>,
    pub timeout: Option<Duration>,
    pub color: Option<String>,
}

/// HTTP settings within a manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectHttpSettings {
    pub proxy: Option<ProjectProxySettings>,
    pub rewrites: Option<HashMap<String, String>>,
}

/// Proxy settings within a manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectProxySettings {
    pub address: Option<String>,
    pub no_proxy: Option<Vec<String>>,
}

/// A project's dependency graph, split into local and remote halves.
#[derive(Debug, Clone, Default)]
pub struct ProjectDependencies {
    pub local: HashMap<String, ProjectLocalDependency>,
    pub remote: HashMap<String, ProjectRemoteDependency>,
}

impl ProjectDependencies {
    pub(crate) fn to_message(&self) -> HashMap<String, ProjectOrDependency> {
        let mut wire = HashMap::with_capacity(self.local.len() + self.remote.len());
        for (name, dep) in &self.local {
            wire.insert(
                name.clone(),
                ProjectOrDependency {
                    package_uri: dep.package_uri.clone(),
                    dependency_type: "local".to_owned(),
                    project_file_uri: dep.project_file_uri.clone(),
                    dependencies: dep.dependencies.to_message(),
                    ..Default::default()
                },
            );
        }
        for (name, dep) in &self.remote {
            wire.insert(
                name.clone(),
                ProjectOrDependency {
                    package_uri: dep.package_uri.clone(),
                    dependency_type: "remote".to_owned(),
                    checksums: dep.checksums.clone(),
                    ..Default::default()
                },
            );
        }
        wire
    }
}

/// A dependency on a sibling project in the workspace.
#[derive(Debug, Clone, Default)]
pub struct ProjectLocalDependency {
    pub package_uri: String,
    pub project_file_uri: String,
    pub dependencies: ProjectDependencies,
}

/// A dependency on a published package.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectRemoteDependency {
    #[serde(rename = "uri")]
    pub package_uri: String,
    pub checksums: Option<Checksums>,
}

/// Loads the project manifest in `project_dir` using a fresh evaluator.
pub async fn load_project(project_dir: impl AsRef<std::path::Path>) -> Result<Project> {
    let evaluator = crate::new_evaluator(crate::EvaluatorOptions::preconfigured()).await?;
    let source = ModuleSource::file(project_dir.as_ref().join("PklProject"))?;
    let project = load_project_from_evaluator(&evaluator, &source).await;
    let _ = evaluator.close().await;
    project
}

/// Loads a project manifest through an existing evaluator.
pub async fn load_project_from_evaluator(
    evaluator: &Evaluator,
    source: &ModuleSource,
) -> Result<Project> {
    let value = evaluator.evaluate_output_value_dynamic(source).await?;
    project_from_value(&value)
}

pub(crate) fn project_from_value(value: &Value) -> Result<Project> {
    ensure_project_mappings();
    let Value::Object(object) = value else {
        return Err(Error::Internal(format!(
            "expected a pkl.Project value, got {}",
            value.kind()
        )));
    };
    let mut project = Project::default();
    if let Some(uri) = object.property("projectFileUri") {
        project.project_file_uri = from_value(uri)?;
    }
    match object.property("package") {
        Some(Value::Null) | None => {}
        Some(package) => project.package = Some(from_value(package)?),
    }
    if let Some(tests) = object.property("tests") {
        project.tests = from_value(tests)?;
    }
    match object.property("evaluatorSettings") {
        Some(Value::Null) | None => {}
        Some(settings) => project.evaluator_settings = from_value(settings)?,
    }
    if let Some(Value::List(annotations)) = object.property("annotations") {
        project.annotations = annotations
            .iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
    }
    if let Some(dependencies) = object.property("dependencies") {
        project.dependencies = dependencies_from_value(dependencies)?;
    }
    Ok(project)
}

fn dependencies_from_value(value: &Value) -> Result<ProjectDependencies> {
    let mut dependencies = ProjectDependencies::default();
    let Value::Map(pairs) = value else {
        return Ok(dependencies);
    };
    for (key, dependency) in pairs {
        let Some(name) = key.as_str() else {
            warn!("skipping a project dependency with a non-string name");
            continue;
        };
        let Some(object) = dependency.as_object() else {
            warn!(dependency = name, "skipping a malformed project dependency");
            continue;
        };
        if object.name == PROJECT_CLASS {
            // a local dependency is a complete nested manifest
            let nested = project_from_value(dependency)?;
            dependencies.local.insert(
                name.to_owned(),
                ProjectLocalDependency {
                    package_uri: nested
                        .package
                        .as_ref()
                        .map(|p| p.uri.clone())
                        .unwrap_or_default(),
                    project_file_uri: nested.project_file_uri.clone(),
                    dependencies: nested.dependencies,
                },
            );
            continue;
        }
        match registry::decode_registered(dependency) {
            Some(Ok(decoded)) => match decoded.downcast::<ProjectRemoteDependency>() {
                Ok(remote) => {
                    dependencies.remote.insert(name.to_owned(), *remote);
                }
                Err(_) => {
                    warn!(
                        dependency = name,
                        class = %object.name,
                        "skipping a dependency decoded to an unexpected type"
                    );
                }
            },
            Some(Err(e)) => return Err(e.into()),
            None => warn!(
                dependency = name,
                class = %object.name,
                "skipping a dependency of an unknown class"
            ),
        }
    }
    Ok(dependencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(name: &str, properties: Vec<(&str, Value)>) -> Value {
        Value::Object(Object {
            module_uri: "pkl:Project".into(),
            name: name.into(),
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
            entries: Vec::new(),
            elements: Vec::new(),
        })
    }

    fn remote_dependency(uri: &str, sha256: &str) -> Value {
        object(
            REMOTE_DEPENDENCY_CLASS,
            vec![
                ("uri", Value::String(uri.into())),
                (
                    "checksums",
                    object(
                        "pkl.Project#RemoteDependency#Checksums",
                        vec![("sha256", Value::String(sha256.into()))],
                    ),
                ),
            ],
        )
    }

    #[test]
    fn decodes_a_manifest_with_dependencies() {
        let nested = object(
            PROJECT_CLASS,
            vec![
                (
                    "projectFileUri",
                    Value::String("file:///ws/lib/PklProject".into()),
                ),
                (
                    "package",
                    object(
                        "pkl.Project#Package",
                        vec![
                            ("name", Value::String("lib".into())),
                            (
                                "uri",
                                Value::String("package://example.com/lib@1.0.0".into()),
                            ),
                        ],
                    ),
                ),
                ("dependencies", Value::Map(Vec::new())),
            ],
        );
        let manifest = object(
            PROJECT_CLASS,
            vec![
                (
                    "projectFileUri",
                    Value::String("file:///ws/app/PklProject".into()),
                ),
                (
                    "evaluatorSettings",
                    object(
                        "pkl.EvaluatorSettings",
                        vec![
                            ("noCache", Value::Bool(true)),
                            (
                                "env",
                                Value::Map(vec![(
                                    Value::String("HOME".into()),
                                    Value::String("/home/pebble".into()),
                                )]),
                            ),
                        ],
                    ),
                ),
                (
                    "dependencies",
                    Value::Map(vec![
                        (Value::String("lib".into()), nested),
                        (
                            Value::String("birds".into()),
                            remote_dependency("package://example.com/birds@0.5.0", "abc123"),
                        ),
                    ]),
                ),
            ],
        );

        let project = project_from_value(&manifest).unwrap();
        assert_eq!(project.project_file_uri, "file:///ws/app/PklProject");
        assert_eq!(project.evaluator_settings.no_cache, Some(true));
        assert_eq!(
            project.evaluator_settings.env.get("HOME").map(String::as_str),
            Some("/home/pebble")
        );

        let deps = project.dependencies();
        assert_eq!(deps.local.len(), 1);
        assert_eq!(deps.remote.len(), 1);
        assert_eq!(
            deps.local["lib"].project_file_uri,
            "file:///ws/lib/PklProject"
        );
        assert_eq!(
            deps.local["lib"].package_uri,
            "package://example.com/lib@1.0.0"
        );
        assert_eq!(
            deps.remote["birds"].package_uri,
            "package://example.com/birds@0.5.0"
        );
        assert_eq!(
            deps.remote["birds"]
                .checksums
                .as_ref()
                .map(|c| c.sha256.as_str()),
            Some("abc123")
        );
    }

    #[test]
    fn dependency_graph_converts_to_wire_form() {
        let mut deps = ProjectDependencies::default();
        deps.remote.insert(
            "birds".to_owned(),
            ProjectRemoteDependency {
                package_uri: "package://example.com/birds@0.5.0".into(),
                checksums: None,
            },
        );
        deps.local.insert(
            "lib".to_owned(),
            ProjectLocalDependency {
                package_uri: "package://example.com/lib@1.0.0".into(),
                project_file_uri: "file:///ws/lib/PklProject".into(),
                dependencies: ProjectDependencies::default(),
            },
        );

        let wire = deps.to_message();
        assert_eq!(wire["birds"].dependency_type, "remote");
        assert_eq!(wire["lib"].dependency_type, "local");
        assert_eq!(wire["lib"].project_file_uri, "file:///ws/lib/PklProject");
    }
}
