//! Custom resource and module readers.
//!
//! A reader answers the evaluator's callbacks for one URI scheme. Resources
//! are read with `read("scheme:...")` expressions, modules with `import`.
//! Register readers on [`EvaluatorOptions`](crate::EvaluatorOptions); the
//! scheme is added to the evaluator's allow lists automatically.
//!
//! The evaluator caches reads for its lifetime, so readers do not need to
//! cache on the host side.

use std::sync::Arc;

use async_trait::async_trait;
use pkl_proto::{
    ListModulesResponse, ListResourcesResponse, ModuleReaderSpec, PathElement,
    ReadModuleResponse, ReadResourceResponse, ResourceReaderSpec,
};
use url::Url;

/// Errors produced by reader implementations.
///
/// Reader errors are relayed to the evaluator verbatim as message text, so
/// any error type works.
pub type ReaderError = Box<dyn std::error::Error + Send + Sync>;

/// Capabilities shared by resource and module readers.
#[async_trait]
pub trait Reader: Send + Sync {
    /// The URI scheme this reader answers for, without the trailing `:`.
    ///
    /// Matching is exact and case-sensitive.
    fn scheme(&self) -> &str;

    /// Whether `read*`/`import*` glob expressions are supported.
    fn is_globbable(&self) -> bool {
        false
    }

    /// Whether URIs of this scheme are hierarchical.
    ///
    /// A hierarchical URI starts its scheme-specific part with `/`:
    /// `flintstone:/persons/fred.pkl` names `fred.pkl` inside `/persons/`,
    /// while `flintstone:persons/fred.pkl` is one opaque name.
    fn has_hierarchical_uris(&self) -> bool {
        false
    }

    /// Lists the elements under a base URI.
    ///
    /// Called only for globbable readers, and for module readers that are
    /// both hierarchical and local. Non-hierarchical readers receive an
    /// empty path and should list everything they have.
    async fn list_elements(&self, uri: &Url) -> Result<Vec<PathElement>, ReaderError> {
        let _ = uri;
        Ok(Vec::new())
    }
}

/// A reader for `read(...)` expressions. Contents are bytes.
#[async_trait]
pub trait ResourceReader: Reader {
    async fn read(&self, uri: &Url) -> Result<Vec<u8>, ReaderError>;
}

/// A reader for module imports. Contents are Pkl source text.
#[async_trait]
pub trait ModuleReader: Reader {
    /// Whether modules of this scheme are local to the runtime. Local
    /// hierarchical modules support triple-dot imports.
    fn is_local(&self) -> bool {
        false
    }

    async fn read(&self, uri: &Url) -> Result<String, ReaderError>;
}

pub(crate) fn find_resource_reader<'a>(
    readers: &'a [Arc<dyn ResourceReader>],
    scheme: &str,
) -> Option<&'a Arc<dyn ResourceReader>> {
    readers.iter().find(|r| r.scheme() == scheme)
}

pub(crate) fn find_module_reader<'a>(
    readers: &'a [Arc<dyn ModuleReader>],
    scheme: &str,
) -> Option<&'a Arc<dyn ModuleReader>> {
    readers.iter().find(|r| r.scheme() == scheme)
}

/// Answers a `ReadResource` request against the registered readers.
pub(crate) async fn service_read_resource(
    readers: &[Arc<dyn ResourceReader>],
    evaluator_id: i64,
    request_id: i64,
    uri: &str,
) -> ReadResourceResponse {
    let mut response = ReadResourceResponse {
        request_id,
        evaluator_id,
        ..Default::default()
    };
    let parsed = match Url::parse(uri) {
        Ok(parsed) => parsed,
        Err(e) => {
            response.error = format!("internal error: failed to parse resource uri: {e}");
            return response;
        }
    };
    match find_resource_reader(readers, parsed.scheme()) {
        None => {
            response.error = format!("No resource reader found for scheme `{}`", parsed.scheme());
        }
        Some(reader) => match reader.read(&parsed).await {
            Ok(contents) => response.contents = contents,
            Err(e) => response.error = e.to_string(),
        },
    }
    response
}

/// Answers a `ReadModule` request against the registered readers.
pub(crate) async fn service_read_module(
    readers: &[Arc<dyn ModuleReader>],
    evaluator_id: i64,
    request_id: i64,
    uri: &str,
) -> ReadModuleResponse {
    let mut response = ReadModuleResponse {
        request_id,
        evaluator_id,
        ..Default::default()
    };
    let parsed = match Url::parse(uri) {
        Ok(parsed) => parsed,
        Err(e) => {
            response.error = format!("internal error: failed to parse module uri: {e}");
            return response;
        }
    };
    match find_module_reader(readers, parsed.scheme()) {
        None => {
            response.error = format!("No module reader found for scheme `{}`", parsed.scheme());
        }
        Some(reader) => match reader.read(&parsed).await {
            Ok(contents) => response.contents = contents,
            Err(e) => response.error = e.to_string(),
        },
    }
    response
}

/// Answers a `ListResources` request against the registered readers.
pub(crate) async fn service_list_resources(
    readers: &[Arc<dyn ResourceReader>],
    evaluator_id: i64,
    request_id: i64,
    uri: &str,
) -> ListResourcesResponse {
    let mut response = ListResourcesResponse {
        request_id,
        evaluator_id,
        ..Default::default()
    };
    let parsed = match Url::parse(uri) {
        Ok(parsed) => parsed,
        Err(e) => {
            response.error = format!("internal error: failed to parse resource uri: {e}");
            return response;
        }
    };
    match find_resource_reader(readers, parsed.scheme()) {
        None => {
            response.error = format!("No resource reader found for scheme `{}`", parsed.scheme());
        }
        Some(reader) => match reader.list_elements(&parsed).await {
            Ok(path_elements) => response.path_elements = path_elements,
            Err(e) => response.error = e.to_string(),
        },
    }
    response
}

/// Answers a `ListModules` request against the registered readers.
pub(crate) async fn service_list_modules(
    readers: &[Arc<dyn ModuleReader>],
    evaluator_id: i64,
    request_id: i64,
    uri: &str,
) -> ListModulesResponse {
    let mut response = ListModulesResponse {
        request_id,
        evaluator_id,
        ..Default::default()
    };
    let parsed = match Url::parse(uri) {
        Ok(parsed) => parsed,
        Err(e) => {
            response.error = format!("internal error: failed to parse module uri: {e}");
            return response;
        }
    };
    match find_module_reader(readers, parsed.scheme()) {
        None => {
            response.error = format!("No module reader found for scheme `{}`", parsed.scheme());
        }
        Some(reader) => match reader.list_elements(&parsed).await {
            Ok(path_elements) => response.path_elements = path_elements,
            Err(e) => response.error = e.to_string(),
        },
    }
    response
}

pub(crate) fn resource_reader_spec(reader: &dyn ResourceReader) -> ResourceReaderSpec {
    ResourceReaderSpec {
        scheme: reader.scheme().to_owned(),
        has_hierarchical_uris: reader.has_hierarchical_uris(),
        is_globbable: reader.is_globbable(),
    }
}

pub(crate) fn module_reader_spec(reader: &dyn ModuleReader) -> ModuleReaderSpec {
    ModuleReaderSpec {
        scheme: reader.scheme().to_owned(),
        has_hierarchical_uris: reader.has_hierarchical_uris(),
        is_globbable: reader.is_globbable(),
        is_local: reader.is_local(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flintstones;

    #[async_trait]
    impl Reader for Flintstones {
        fn scheme(&self) -> &str {
            "flintstone"
        }

        fn is_globbable(&self) -> bool {
            true
        }

        async fn list_elements(&self, _uri: &Url) -> Result<Vec<PathElement>, ReaderError> {
            Ok(vec![
                PathElement::new("fred", false),
                PathElement::new("wilma", false),
            ])
        }
    }

    #[async_trait]
    impl ResourceReader for Flintstones {
        async fn read(&self, uri: &Url) -> Result<Vec<u8>, ReaderError> {
            match uri.path() {
                "fred" => Ok(b"Fred Flintstone".to_vec()),
                other => Err(format!("no such flintstone: {other}").into()),
            }
        }
    }

    #[tokio::test]
    async fn read_matches_scheme_exactly() {
        let readers: Vec<Arc<dyn ResourceReader>> = vec![Arc::new(Flintstones)];

        let hit = service_read_resource(&readers, 1, 10, "flintstone:fred").await;
        assert_eq!(hit.contents, b"Fred Flintstone");
        assert!(hit.error.is_empty());
        assert_eq!(hit.evaluator_id, 1);
        assert_eq!(hit.request_id, 10);

        let miss = service_read_resource(&readers, 1, 11, "rubble:barney").await;
        assert_eq!(miss.error, "No resource reader found for scheme `rubble`");
        assert!(miss.contents.is_empty());
    }

    #[tokio::test]
    async fn reader_errors_are_relayed_as_text() {
        let readers: Vec<Arc<dyn ResourceReader>> = vec![Arc::new(Flintstones)];
        let response = service_read_resource(&readers, 1, 12, "flintstone:pebbles").await;
        assert_eq!(response.error, "no such flintstone: pebbles");
    }

    #[tokio::test]
    async fn listing_goes_through_the_reader() {
        let readers: Vec<Arc<dyn ResourceReader>> = vec![Arc::new(Flintstones)];
        let response = service_list_resources(&readers, 2, 13, "flintstone:").await;
        assert!(response.error.is_empty());
        assert_eq!(response.path_elements.len(), 2);
        assert_eq!(response.path_elements[0].name, "fred");
    }
}
