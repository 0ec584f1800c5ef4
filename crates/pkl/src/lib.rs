//! Bindings to the [Pkl](https://pkl-lang.org) configuration language.
//!
//! Pkl runs out of process (or in process via the `libpkl` feature); this
//! crate spawns and controls it, multiplexes evaluation requests over a
//! bidirectional MessagePack channel, services its resource and module read
//! callbacks, and decodes evaluation results into host types.
//!
//! # Evaluating a module
//!
//! ```ignore
//! use pkl::{EvaluatorManager, EvaluatorOptions, ModuleSource};
//!
//! let manager = EvaluatorManager::new();
//! let evaluator = manager
//!     .new_evaluator(EvaluatorOptions::preconfigured())
//!     .await?;
//! let text = evaluator
//!     .evaluate_output_text(&ModuleSource::text("foo { bar = 1 }"))
//!     .await?;
//! assert_eq!(text, "foo {\n  bar = 1\n}\n");
//! manager.close().await?;
//! ```
//!
//! Typed results go through `serde::Deserialize`, with field names bound to
//! Pkl property names via rename attributes; see [`decoder`] for the value
//! model and the polymorphism registry.
//!
//! # Custom readers
//!
//! Implement [`ResourceReader`] or [`ModuleReader`] and register them on
//! [`EvaluatorOptions`] to answer `read("myscheme:...")` and
//! `import "myscheme:..."` from host code. The inverse role, an executable
//! serving reads to an evaluator that spawned it, is
//! [`ExternalReaderClient`].

pub mod decoder;
mod error;
mod evaluator;
mod external_reader;
mod fs_reader;
mod logger;
mod manager;
mod module_source;
mod options;
mod project;
mod reader;
mod transport;
mod version;

pub use error::{Error, Result};
pub use evaluator::{Evaluator, ManagedEvaluator};
pub use external_reader::ExternalReaderClient;
pub use fs_reader::FsReader;
pub use logger::{format_log_message, Logger, NoopLogger, TracingLogger, WriterLogger};
pub use manager::EvaluatorManager;
pub use module_source::ModuleSource;
pub use options::{EvaluatorOptions, OutputFormat};
pub use project::{
    load_project, load_project_from_evaluator, Project, ProjectDependencies,
    ProjectEvaluatorSettings, ProjectHttpSettings, ProjectLocalDependency, ProjectPackage,
    ProjectProxySettings, ProjectRemoteDependency,
};
pub use reader::{ModuleReader, Reader, ReaderError, ResourceReader};
pub use transport::{ChildTransport, Transport, TransportChannels};
#[cfg(feature = "libpkl")]
pub use transport::NativeTransport;

// the wire protocol, for tests and advanced integrations
pub use pkl_proto as proto;

use url::Url;

/// Creates an evaluator backed by its own manager.
///
/// The returned [`ManagedEvaluator`] closes its manager, and with it the
/// backend process, when closed. When creating several evaluators, prefer
/// one [`EvaluatorManager`] so they share a backend process.
pub async fn new_evaluator(options: EvaluatorOptions) -> Result<ManagedEvaluator> {
    let manager = EvaluatorManager::new();
    match manager.new_evaluator(options).await {
        Ok(evaluator) => Ok(ManagedEvaluator::new(evaluator, manager)),
        Err(e) => {
            let _ = manager.close().await;
            Err(e)
        }
    }
}

/// Creates an evaluator configured by the project at `project_base_uri`,
/// backed by its own manager.
///
/// Like [`new_evaluator`], the returned evaluator closes its manager on
/// close.
pub async fn new_project_evaluator(
    project_base_uri: &Url,
    options: EvaluatorOptions,
) -> Result<ManagedEvaluator> {
    let manager = EvaluatorManager::new();
    match manager.new_project_evaluator(project_base_uri, options).await {
        Ok(evaluator) => Ok(ManagedEvaluator::new(evaluator, manager)),
        Err(e) => {
            let _ = manager.close().await;
            Err(e)
        }
    }
}
