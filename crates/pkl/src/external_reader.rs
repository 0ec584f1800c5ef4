//! The external reader client: the host side of reader subprocesses.
//!
//! An [external reader](https://pkl-lang.org/main/current/language-reference/index.html#external-readers)
//! is an executable the Pkl evaluator spawns itself, speaking the same
//! framed protocol with the roles reversed: the evaluator asks, the
//! executable answers on its stdout. Register readers, then hand control to
//! [`ExternalReaderClient::run`] from `main`.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use pkl_proto::{
    IncomingMessage, InitializeModuleReaderResponse, InitializeResourceReaderResponse,
    MessageCodec, OutgoingMessage,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::error::Result;
use crate::reader::{
    find_module_reader, find_resource_reader, module_reader_spec, resource_reader_spec,
    service_list_modules, service_list_resources, service_read_module, service_read_resource,
    ModuleReader, ResourceReader,
};

/// Serves reader requests from a Pkl evaluator over stdin/stdout.
#[derive(Default)]
pub struct ExternalReaderClient {
    resource_readers: Vec<Arc<dyn ResourceReader>>,
    module_readers: Vec<Arc<dyn ModuleReader>>,
}

impl ExternalReaderClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_resource_reader(mut self, reader: Arc<dyn ResourceReader>) -> Self {
        self.resource_readers.push(reader);
        self
    }

    #[must_use]
    pub fn with_module_reader(mut self, reader: Arc<dyn ModuleReader>) -> Self {
        self.module_readers.push(reader);
        self
    }

    /// Serves requests on stdin/stdout until the evaluator closes the
    /// process or the stream ends.
    pub async fn run(self) -> Result<()> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Like [`run`](Self::run), but over caller-supplied streams.
    pub async fn run_with<R, W>(self, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        for reader in &self.module_readers {
            debug!(scheme = reader.scheme(), "registered module reader");
        }
        for reader in &self.resource_readers {
            debug!(scheme = reader.scheme(), "registered resource reader");
        }

        let mut requests = FramedRead::new(input, MessageCodec::new());
        let mut responses = FramedWrite::new(output, MessageCodec::new());

        while let Some(message) = requests.next().await {
            let response = match message? {
                IncomingMessage::InitializeModuleReader(request) => {
                    OutgoingMessage::InitializeModuleReaderResponse(
                        InitializeModuleReaderResponse {
                            request_id: request.request_id,
                            spec: find_module_reader(&self.module_readers, &request.scheme)
                                .map(|r| module_reader_spec(r.as_ref())),
                        },
                    )
                }
                IncomingMessage::InitializeResourceReader(request) => {
                    OutgoingMessage::InitializeResourceReaderResponse(
                        InitializeResourceReaderResponse {
                            request_id: request.request_id,
                            spec: find_resource_reader(&self.resource_readers, &request.scheme)
                                .map(|r| resource_reader_spec(r.as_ref())),
                        },
                    )
                }
                IncomingMessage::ReadResource(request) => OutgoingMessage::ReadResourceResponse(
                    service_read_resource(
                        &self.resource_readers,
                        request.evaluator_id,
                        request.request_id,
                        &request.uri,
                    )
                    .await,
                ),
                IncomingMessage::ReadModule(request) => OutgoingMessage::ReadModuleResponse(
                    service_read_module(
                        &self.module_readers,
                        request.evaluator_id,
                        request.request_id,
                        &request.uri,
                    )
                    .await,
                ),
                IncomingMessage::ListResources(request) => OutgoingMessage::ListResourcesResponse(
                    service_list_resources(
                        &self.resource_readers,
                        request.evaluator_id,
                        request.request_id,
                        &request.uri,
                    )
                    .await,
                ),
                IncomingMessage::ListModules(request) => OutgoingMessage::ListModulesResponse(
                    service_list_modules(
                        &self.module_readers,
                        request.evaluator_id,
                        request.request_id,
                        &request.uri,
                    )
                    .await,
                ),
                IncomingMessage::CloseExternalProcess(_) => break,
                other => {
                    warn!(code = other.code(), "ignoring an unexpected message");
                    continue;
                }
            };
            responses.send(response).await?;
        }
        Ok(())
    }
}
