//! Sources for Pkl evaluation.

use std::path::Path;

use url::Url;

use crate::error::{Error, Result};

/// A module to evaluate: a URI plus optional inline text.
///
/// When `contents` is absent the backend resolves the URI itself, consulting
/// any module readers registered for the URI's scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    pub uri: Url,
    pub contents: Option<String>,
}

impl ModuleSource {
    /// A module read from the file system.
    ///
    /// Relative paths are resolved against the current working directory.
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let uri = Url::from_file_path(&absolute).map_err(|()| {
            Error::Internal(format!("cannot express `{}` as a file URI", absolute.display()))
        })?;
        Ok(Self {
            uri,
            contents: None,
        })
    }

    /// A module held entirely in memory, addressed as `repl:text`.
    #[must_use]
    pub fn text(contents: impl Into<String>) -> Self {
        Self {
            // repl:text is always parseable
            uri: Url::parse("repl:text").unwrap(),
            contents: Some(contents.into()),
        }
    }

    /// A module addressed by an arbitrary URI, resolved by the backend.
    #[must_use]
    pub fn uri(uri: Url) -> Self {
        Self {
            uri,
            contents: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_source_uses_repl_scheme() {
        let source = ModuleSource::text("foo = 1");
        assert_eq!(source.uri.as_str(), "repl:text");
        assert_eq!(source.contents.as_deref(), Some("foo = 1"));
    }

    #[test]
    fn file_source_is_absolute() {
        let source = ModuleSource::file("config/app.pkl").unwrap();
        assert_eq!(source.uri.scheme(), "file");
        assert!(source.uri.path().ends_with("/config/app.pkl"));
        assert!(source.contents.is_none());
    }

    #[test]
    fn uri_source_passes_through() {
        let uri = Url::parse("package://example.com/birds@0.5.0#/Bird.pkl").unwrap();
        let source = ModuleSource::uri(uri.clone());
        assert_eq!(source.uri, uri);
    }
}
