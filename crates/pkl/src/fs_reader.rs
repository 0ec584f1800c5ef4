//! A reader backed by a directory tree.
//!
//! Pairs a root directory with a URI scheme: `myfs:/sub/file.txt` resolves
//! to `<root>/sub/file.txt`. Paths are interpreted as rooted at `/`, so the
//! leading slash of the hierarchical URI path is stripped before lookup.
//! Symbolic links are skipped during listing, matching the behaviour of
//! Pkl's built-in `file` reader.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pkl_proto::PathElement;
use url::Url;

use crate::reader::{ModuleReader, Reader, ReaderError, ResourceReader};

/// A directory tree exposed to Pkl under a scheme of your choice.
///
/// Implements both [`ResourceReader`] and [`ModuleReader`]; register it for
/// whichever roles you need, or both at once via
/// [`EvaluatorOptions::with_fs`](crate::EvaluatorOptions::with_fs).
#[derive(Debug, Clone)]
pub struct FsReader {
    root: PathBuf,
    scheme: String,
}

impl FsReader {
    pub fn new(root: impl Into<PathBuf>, scheme: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            scheme: scheme.into(),
        }
    }

    fn resolve(&self, uri: &Url) -> PathBuf {
        let trimmed = uri.path().trim_start_matches('/');
        self.root.join(trimmed)
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<PathElement>, ReaderError> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut elements = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            // match Pkl's built-in file reader and don't follow symlinks
            if file_type.is_symlink() {
                continue;
            }
            elements.push(PathElement::new(
                entry.file_name().to_string_lossy().into_owned(),
                file_type.is_dir(),
            ));
        }
        Ok(elements)
    }
}

#[async_trait]
impl Reader for FsReader {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn is_globbable(&self) -> bool {
        true
    }

    fn has_hierarchical_uris(&self) -> bool {
        true
    }

    async fn list_elements(&self, uri: &Url) -> Result<Vec<PathElement>, ReaderError> {
        let path = self.resolve(uri);
        self.list_dir(&path).await
    }
}

#[async_trait]
impl ResourceReader for FsReader {
    async fn read(&self, uri: &Url) -> Result<Vec<u8>, ReaderError> {
        Ok(tokio::fs::read(self.resolve(uri)).await?)
    }
}

#[async_trait]
impl ModuleReader for FsReader {
    fn is_local(&self) -> bool {
        true
    }

    async fn read(&self, uri: &Url) -> Result<String, ReaderError> {
        Ok(tokio::fs::read_to_string(self.resolve(uri)).await?)
    }
}
