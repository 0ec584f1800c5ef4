//! Evaluator configuration.
//!
//! Options are assembled with `with_*` builder methods and frozen at
//! evaluator creation; changing an options value afterwards has no effect
//! on evaluators already created from it.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use pkl_proto::{CreateEvaluator, ExternalReaderSpec, Http, Proxy, TraceMode};
use semver::Version;

use crate::error::{Error, Result};
use crate::fs_reader::FsReader;
use crate::logger::{Logger, NoopLogger};
use crate::project::{Project, ProjectDependencies, ProjectEvaluatorSettings};
use crate::reader::{module_reader_spec, resource_reader_spec, ModuleReader, ResourceReader};
use crate::version::{
    supports, FLOOR_EXTERNAL_READERS, FLOOR_HTTP, FLOOR_HTTP_REWRITES, FLOOR_TRACE_MODE,
};

/// The renderer for `output.text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pcf,
    Json,
    Jsonnet,
    Plist,
    Properties,
    Textproto,
    Xml,
    Yaml,
}

impl OutputFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pcf => "pcf",
            Self::Json => "json",
            Self::Jsonnet => "jsonnet",
            Self::Plist => "plist",
            Self::Properties => "properties",
            Self::Textproto => "textproto",
            Self::Xml => "xml",
            Self::Yaml => "yaml",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of options controlling Pkl evaluation.
#[derive(Clone)]
pub struct EvaluatorOptions {
    /// Properties available to the `prop:` resource reader.
    pub properties: HashMap<String, String>,
    /// Environment variables available to the `env:` resource reader.
    pub env: HashMap<String, String>,
    /// Directories, ZIPs, or JARs searched for `modulepath:` URIs.
    pub module_paths: Vec<String>,
    /// Sink for trace/warn events emitted by evaluation.
    pub logger: Arc<dyn Logger>,
    /// Renderer for `output.text`. The backend defaults to Pcf.
    pub output_format: Option<OutputFormat>,
    /// URI-pattern regexes for modules permitted to load.
    pub allowed_modules: Vec<String>,
    /// URI-pattern regexes for resources permitted to load.
    pub allowed_resources: Vec<String>,
    /// Host-side resource readers, consulted in order by scheme.
    pub resource_readers: Vec<Arc<dyn ResourceReader>>,
    /// Host-side module readers, consulted in order by scheme.
    pub module_readers: Vec<Arc<dyn ModuleReader>>,
    /// Cache directory for `package:` modules. `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    /// Root directory bounding file-based reads.
    pub root_dir: Option<PathBuf>,
    /// Base URI for project dependency resolution.
    pub project_base_uri: Option<String>,
    /// Dependencies available to modules within the project base.
    pub declared_project_dependencies: Option<ProjectDependencies>,
    /// HTTP settings. Requires Pkl 0.26; rewrites require 0.29.
    pub http: Option<Http>,
    /// External module reader processes by scheme. Requires Pkl 0.27.
    pub external_module_readers: HashMap<String, ExternalReaderSpec>,
    /// External resource reader processes by scheme. Requires Pkl 0.27.
    pub external_resource_readers: HashMap<String, ExternalReaderSpec>,
    /// Rendering of `trace()` output. Requires Pkl 0.30.
    pub trace_mode: Option<TraceMode>,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            properties: HashMap::new(),
            env: HashMap::new(),
            module_paths: Vec::new(),
            logger: Arc::new(NoopLogger),
            output_format: None,
            allowed_modules: Vec::new(),
            allowed_resources: Vec::new(),
            resource_readers: Vec::new(),
            module_readers: Vec::new(),
            cache_dir: None,
            root_dir: None,
            project_base_uri: None,
            declared_project_dependencies: None,
            http: None,
            external_module_readers: HashMap::new(),
            external_resource_readers: HashMap::new(),
            trace_mode: None,
        }
    }
}

impl EvaluatorOptions {
    /// The standard configuration:
    ///
    /// - the built-in allowed module and resource schemes
    /// - environment variables from the host process
    /// - `~/.pkl/cache` as the cache directory
    /// - no-op logging
    #[must_use]
    pub fn preconfigured() -> Self {
        Self::default()
            .with_default_allowed_resources()
            .with_default_allowed_modules()
            .with_os_env()
            .with_default_cache_dir()
    }

    /// Like [`preconfigured`](Self::preconfigured), but each default is
    /// applied only where nothing has been set yet: allow lists stay as
    /// given when non-empty, the host environment is skipped when `env`
    /// already has entries, and the cache directory is kept when set.
    #[must_use]
    pub fn maybe_preconfigured(mut self) -> Self {
        if self.allowed_resources.is_empty() {
            self = self.with_default_allowed_resources();
        }
        if self.env.is_empty() {
            self = self.with_os_env();
        }
        if self.allowed_modules.is_empty() {
            self = self.with_default_allowed_modules();
        }
        if self.cache_dir.is_none() {
            self = self.with_default_cache_dir();
        }
        self
    }

    /// Allows `http:`, `https:`, `file:`, `env:`, `prop:`, `modulepath:`,
    /// `package:`, and `projectpackage:` resources.
    #[must_use]
    pub fn with_default_allowed_resources(mut self) -> Self {
        for scheme in [
            "http:",
            "https:",
            "file:",
            "env:",
            "prop:",
            "modulepath:",
            "package:",
            "projectpackage:",
        ] {
            self.allowed_resources.push(scheme.to_owned());
        }
        self
    }

    /// Allows `pkl:`, `repl:`, `file:`, `http:`, `https:`, `modulepath:`,
    /// `package:`, and `projectpackage:` modules.
    #[must_use]
    pub fn with_default_allowed_modules(mut self) -> Self {
        for scheme in [
            "pkl:",
            "repl:",
            "file:",
            "http:",
            "https:",
            "modulepath:",
            "package:",
            "projectpackage:",
        ] {
            self.allowed_modules.push(scheme.to_owned());
        }
        self
    }

    /// Exposes the host process environment to the `env:` reader.
    #[must_use]
    pub fn with_os_env(mut self) -> Self {
        for (key, value) in std::env::vars() {
            self.env.entry(key).or_insert(value);
        }
        self
    }

    /// Uses Pkl's default cache location, `~/.pkl/cache`.
    #[must_use]
    pub fn with_default_cache_dir(mut self) -> Self {
        if let Some(home) = dirs::home_dir() {
            self.cache_dir = Some(home.join(".pkl/cache"));
        }
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_module_path(mut self, path: impl Into<String>) -> Self {
        self.module_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_http(mut self, http: Http) -> Self {
        self.http = Some(http);
        self
    }

    #[must_use]
    pub fn with_trace_mode(mut self, mode: TraceMode) -> Self {
        self.trace_mode = Some(mode);
        self
    }

    /// Registers a resource reader and allows its scheme.
    #[must_use]
    pub fn with_resource_reader(mut self, reader: Arc<dyn ResourceReader>) -> Self {
        self.allowed_resources.push(format!("{}:", reader.scheme()));
        self.resource_readers.push(reader);
        self
    }

    /// Registers a module reader and allows its scheme.
    #[must_use]
    pub fn with_module_reader(mut self, reader: Arc<dyn ModuleReader>) -> Self {
        self.allowed_modules.push(format!("{}:", reader.scheme()));
        self.module_readers.push(reader);
        self
    }

    /// Serves a directory tree as both modules and resources under the
    /// given scheme.
    ///
    /// Paths are rooted: `<scheme>:/foo.txt` reads `<root>/foo.txt`.
    /// Modules and resources in the tree may be globbed with `import*` and
    /// `read*`, and modules may use triple-dot imports.
    #[must_use]
    pub fn with_fs(self, root: impl Into<PathBuf>, scheme: impl Into<String>) -> Self {
        let reader = Arc::new(FsReader::new(root, scheme));
        self.with_module_reader(reader.clone())
            .with_resource_reader(reader)
    }

    /// Registers an external resource reader process and allows its scheme.
    #[must_use]
    pub fn with_external_resource_reader(
        mut self,
        scheme: impl Into<String>,
        spec: ExternalReaderSpec,
    ) -> Self {
        let scheme = scheme.into();
        self.allowed_resources.push(format!("{scheme}:"));
        self.external_resource_readers.insert(scheme, spec);
        self
    }

    /// Registers an external module reader process and allows its scheme.
    #[must_use]
    pub fn with_external_module_reader(
        mut self,
        scheme: impl Into<String>,
        spec: ExternalReaderSpec,
    ) -> Self {
        let scheme = scheme.into();
        self.allowed_modules.push(format!("{scheme}:"));
        self.external_module_readers.insert(scheme, spec);
        self
    }

    /// Applies a project's evaluator settings and dependency graph.
    ///
    /// Settings the project defines replace whatever was set before; its
    /// external reader registrations are unioned in and win on conflict.
    #[must_use]
    pub fn with_project(self, project: &Project) -> Self {
        self.with_project_evaluator_settings(&project.evaluator_settings)
            .with_project_dependencies(project)
    }

    /// Attaches the project's dependency graph and base URI.
    #[must_use]
    pub fn with_project_dependencies(mut self, project: &Project) -> Self {
        self.project_base_uri = Some(
            project
                .project_file_uri
                .trim_end_matches("/PklProject")
                .to_owned(),
        );
        self.declared_project_dependencies = Some(project.dependencies().clone());
        self
    }

    /// Applies the settings block of a project manifest.
    #[must_use]
    pub fn with_project_evaluator_settings(
        mut self,
        settings: &ProjectEvaluatorSettings,
    ) -> Self {
        if !settings.external_properties.is_empty() {
            self.properties = settings.external_properties.clone();
        }
        if !settings.env.is_empty() {
            self.env = settings.env.clone();
        }
        if let Some(allowed) = &settings.allowed_modules {
            self.allowed_modules = allowed.clone();
        }
        if let Some(allowed) = &settings.allowed_resources {
            self.allowed_resources = allowed.clone();
        }
        if settings.no_cache == Some(true) {
            self.cache_dir = None;
        } else if let Some(dir) = &settings.module_cache_dir {
            self.cache_dir = Some(dir.into());
        }
        if let Some(root) = &settings.root_dir {
            self.root_dir = Some(root.into());
        }
        if !settings.module_path.is_empty() {
            self.module_paths = settings.module_path.clone();
        }
        if let Some(http) = &settings.http {
            self.http = Some(Http {
                ca_certificates: None,
                proxy: http.proxy.as_ref().map(|proxy| Proxy {
                    address: proxy.address.clone(),
                    no_proxy: proxy.no_proxy.clone(),
                }),
                rewrites: http.rewrites.clone(),
            });
        }
        for (scheme, spec) in &settings.external_module_readers {
            self.external_module_readers
                .insert(scheme.clone(), spec.clone());
        }
        for (scheme, spec) in &settings.external_resource_readers {
            self.external_resource_readers
                .insert(scheme.clone(), spec.clone());
        }
        if let Some(mode) = settings.trace_mode {
            self.trace_mode = Some(mode);
        }
        self
    }

    /// Rejects options the running backend cannot honour.
    pub(crate) fn check_compatibility(&self, version: &Version) -> Result<()> {
        if self.http.is_some() && !supports(version, FLOOR_HTTP) {
            return Err(Error::Config(
                "http options are not supported on Pkl versions lower than 0.26".into(),
            ));
        }
        if let Some(http) = &self.http {
            if http.rewrites.is_some() && !supports(version, FLOOR_HTTP_REWRITES) {
                return Err(Error::Config(
                    "http rewrites are not supported on Pkl versions lower than 0.29".into(),
                ));
            }
        }
        if (!self.external_module_readers.is_empty() || !self.external_resource_readers.is_empty())
            && !supports(version, FLOOR_EXTERNAL_READERS)
        {
            return Err(Error::Config(
                "external readers are not supported on Pkl versions lower than 0.27".into(),
            ));
        }
        if self.trace_mode.is_some() && !supports(version, FLOOR_TRACE_MODE) {
            return Err(Error::Config(
                "trace mode is not supported on Pkl versions lower than 0.30".into(),
            ));
        }
        Ok(())
    }

    /// Builds the wire message requesting an evaluator with these options.
    pub(crate) fn to_message(&self, request_id: i64) -> CreateEvaluator {
        let mut allowed_modules = self.allowed_modules.clone();
        // repl:text holds inline text modules and must always be allowed
        if !allowed_modules.iter().any(|p| p == "repl:text") {
            allowed_modules.push("repl:text".to_owned());
        }
        CreateEvaluator {
            request_id,
            resource_readers: self
                .resource_readers
                .iter()
                .map(|r| resource_reader_spec(r.as_ref()))
                .collect(),
            module_readers: self
                .module_readers
                .iter()
                .map(|r| module_reader_spec(r.as_ref()))
                .collect(),
            module_paths: self.module_paths.clone(),
            env: self.env.clone(),
            properties: self.properties.clone(),
            output_format: self.output_format.map(|f| f.as_str().to_owned()),
            allowed_modules,
            allowed_resources: self.allowed_resources.clone(),
            root_dir: self
                .root_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            cache_dir: self
                .cache_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            project: self.project_base_uri.as_ref().map(|base_uri| {
                pkl_proto::ProjectOrDependency {
                    project_file_uri: format!("{base_uri}/PklProject"),
                    dependencies: self
                        .declared_project_dependencies
                        .as_ref()
                        .map(ProjectDependencies::to_message)
                        .unwrap_or_default(),
                    ..Default::default()
                }
            }),
            http: self.http.clone(),
            external_module_readers: self.external_module_readers.clone(),
            external_resource_readers: self.external_resource_readers.clone(),
            trace_mode: self.trace_mode,
        }
    }
}
