//! A single evaluation context on a shared backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use pkl_proto::{
    CloseEvaluator, Evaluate, EvaluateResponse, Log, OutgoingMessage, ReadModule, ReadResource,
    LOG_LEVEL_TRACE, LOG_LEVEL_WARN,
};
use semver::Version;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::warn;

use crate::decoder::{self, Value};
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::manager::{next_request_id, ManagerInner};
use crate::module_source::ModuleSource;
use crate::reader::{
    service_list_modules, service_list_resources, service_read_module, service_read_resource,
    ModuleReader, ResourceReader,
};
use crate::version::{supports, FLOOR_BYTES};

const OUTPUT_FILES_TEXT_EXPR: &str =
    "output.files?.toMap()?.mapValues((_, it) -> it.text) ?? Map()";
const OUTPUT_FILES_BYTES_EXPR: &str =
    "output.files?.toMap()?.mapValues((_, it) -> it.bytes) ?? Map()";

/// Evaluates Pkl modules and expressions.
///
/// Evaluators are cheap handles onto a backend-assigned context; clone
/// freely. Concurrent evaluations on one evaluator are fine: every call
/// carries its own request id and gets exactly its own response.
///
/// An in-flight call can be abandoned by dropping its future; the response
/// slot is reclaimed when the response eventually arrives or the evaluator
/// closes. Deadlines are the caller's concern, e.g. via
/// `tokio::time::timeout`.
#[derive(Clone)]
pub struct Evaluator {
    manager: Arc<ManagerInner>,
    state: Arc<EvaluatorState>,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator").finish_non_exhaustive()
    }
}

impl Evaluator {
    pub(crate) fn new(manager: Arc<ManagerInner>, state: Arc<EvaluatorState>) -> Self {
        Self { manager, state }
    }

    /// The backend-assigned id of this evaluator.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.state.id
    }

    /// Whether this evaluator has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Evaluates the whole module into a host type.
    pub async fn evaluate_module<T: DeserializeOwned>(&self, source: &ModuleSource) -> Result<T> {
        self.evaluate_expression(source, "").await
    }

    /// Evaluates the module's rendered `output.text`.
    pub async fn evaluate_output_text(&self, source: &ModuleSource) -> Result<String> {
        self.evaluate_expression(source, "output.text").await
    }

    /// Evaluates the module's rendered `output.bytes`.
    ///
    /// Requires Pkl 0.29 or higher.
    pub async fn evaluate_output_bytes(&self, source: &ModuleSource) -> Result<Vec<u8>> {
        self.require_bytes_support()?;
        self.evaluate_expression(source, "output.bytes").await
    }

    /// Evaluates the module's `output.value` into a host type.
    pub async fn evaluate_output_value<T: DeserializeOwned>(
        &self,
        source: &ModuleSource,
    ) -> Result<T> {
        self.evaluate_expression(source, "output.value").await
    }

    /// Evaluates the module's `output.value` into a dynamic [`Value`].
    pub async fn evaluate_output_value_dynamic(&self, source: &ModuleSource) -> Result<Value> {
        let raw = self.evaluate_expression_raw(source, "output.value").await?;
        Ok(decoder::decode_value(&raw)?)
    }

    /// Evaluates `output.files`, rendering each file to text.
    pub async fn evaluate_output_files(
        &self,
        source: &ModuleSource,
    ) -> Result<HashMap<String, String>> {
        self.evaluate_expression(source, OUTPUT_FILES_TEXT_EXPR).await
    }

    /// Evaluates `output.files`, rendering each file to bytes.
    ///
    /// Requires Pkl 0.29 or higher.
    pub async fn evaluate_output_files_bytes(
        &self,
        source: &ModuleSource,
    ) -> Result<HashMap<String, Vec<u8>>> {
        self.require_bytes_support()?;
        self.evaluate_expression(source, OUTPUT_FILES_BYTES_EXPR)
            .await
    }

    /// Evaluates an expression against the module into a host type.
    pub async fn evaluate_expression<T: DeserializeOwned>(
        &self,
        source: &ModuleSource,
        expr: &str,
    ) -> Result<T> {
        let raw = self.evaluate_expression_raw(source, expr).await?;
        Ok(decoder::decode(&raw)?)
    }

    /// Evaluates an expression and returns the raw binary envelope.
    ///
    /// This is the low-level escape hatch; the `evaluate_*` methods decode
    /// it for you.
    pub async fn evaluate_expression_raw(
        &self,
        source: &ModuleSource,
        expr: &str,
    ) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(Error::EvaluatorClosed);
        }

        let request_id = next_request_id();
        let (tx, rx) = oneshot::channel();
        self.state.pending.insert(request_id, tx);

        let mut guard = self.manager.interrupted_guard(self.state.id);
        let interrupted = guard.take_receiver();

        let message = OutgoingMessage::Evaluate(Evaluate {
            request_id,
            evaluator_id: self.state.id,
            module_uri: source.uri.to_string(),
            module_text: source.contents.clone().unwrap_or_default(),
            expr: expr.to_owned(),
        });
        if let Err(e) = self.manager.send(message).await {
            self.state.pending.remove(&request_id);
            return Err(e);
        }

        tokio::select! {
            response = rx => match response {
                Ok(response) if !response.error.is_empty() => Err(Error::Eval(response.error)),
                Ok(response) => Ok(response.result),
                // the slot was drained by a concurrent close
                Err(_) => Err(Error::EvaluatorClosed),
            },
            err = interrupted => Err(err.unwrap_or(Error::EvaluatorClosed)),
        }
    }

    /// Closes this evaluator. Idempotent; in-flight calls resolve with
    /// [`Error::EvaluatorClosed`].
    pub async fn close(&self) -> Result<()> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // nothing left to tell a closed manager
        if !self.manager.closed.load(Ordering::SeqCst) {
            let _ = self
                .manager
                .send(OutgoingMessage::CloseEvaluator(CloseEvaluator {
                    evaluator_id: self.state.id,
                }))
                .await;
        }
        self.manager.evaluators.remove(&self.state.id);
        self.state.drain_pending();
        self.manager.interrupt_evaluator(self.state.id);
        Ok(())
    }

    fn require_bytes_support(&self) -> Result<()> {
        if supports(&self.state.backend_version, FLOOR_BYTES) {
            Ok(())
        } else {
            Err(Error::Config(
                "bytes output is not supported on Pkl versions lower than 0.29".into(),
            ))
        }
    }
}

/// An evaluator that owns its backing manager.
///
/// Returned by the standalone [`crate::new_evaluator`] and
/// [`crate::new_project_evaluator`] constructors. Evaluation methods are
/// available through deref; [`close`](Self::close) closes the manager, and
/// with it the backend process. Idempotent like the underlying closes.
pub struct ManagedEvaluator {
    evaluator: Evaluator,
    manager: crate::manager::EvaluatorManager,
}

impl ManagedEvaluator {
    pub(crate) fn new(evaluator: Evaluator, manager: crate::manager::EvaluatorManager) -> Self {
        Self { evaluator, manager }
    }

    /// The manager backing this evaluator.
    #[must_use]
    pub fn manager(&self) -> &crate::manager::EvaluatorManager {
        &self.manager
    }

    /// Closes the backing manager and releases the backend.
    pub async fn close(&self) -> Result<()> {
        self.manager.close().await
    }
}

impl std::ops::Deref for ManagedEvaluator {
    type Target = Evaluator;

    fn deref(&self) -> &Evaluator {
        &self.evaluator
    }
}

/// Shared state of one evaluator, owned jointly by its handles and the
/// manager's routing table.
pub(crate) struct EvaluatorState {
    pub(crate) id: i64,
    pub(crate) backend_version: Version,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) resource_readers: Vec<Arc<dyn ResourceReader>>,
    pub(crate) module_readers: Vec<Arc<dyn ModuleReader>>,
    pub(crate) pending: DashMap<i64, oneshot::Sender<EvaluateResponse>>,
    pub(crate) closed: AtomicBool,
}

impl EvaluatorState {
    /// Drops every pending response slot, resolving the waiters.
    pub(crate) fn drain_pending(&self) {
        self.pending.clear();
    }

    pub(crate) fn handle_evaluate_response(&self, response: EvaluateResponse) {
        match self.pending.remove(&response.request_id) {
            Some((_, tx)) => {
                let _ = tx.send(response);
            }
            None => warn!(
                request_id = response.request_id,
                "received a response for an unknown request id"
            ),
        }
    }

    pub(crate) fn handle_log(&self, event: &Log) {
        match event.level {
            LOG_LEVEL_TRACE => self.logger.trace(&event.message, &event.frame_uri),
            LOG_LEVEL_WARN => self.logger.warn(&event.message, &event.frame_uri),
            other => warn!(level = other, "dropping a log event with an unknown level"),
        }
    }

    pub(crate) async fn handle_read_resource(&self, manager: &ManagerInner, request: ReadResource) {
        let response =
            service_read_resource(&self.resource_readers, self.id, request.request_id, &request.uri)
                .await;
        let _ = manager
            .send(OutgoingMessage::ReadResourceResponse(response))
            .await;
    }

    pub(crate) async fn handle_read_module(&self, manager: &ManagerInner, request: ReadModule) {
        let response =
            service_read_module(&self.module_readers, self.id, request.request_id, &request.uri)
                .await;
        let _ = manager
            .send(OutgoingMessage::ReadModuleResponse(response))
            .await;
    }

    pub(crate) async fn handle_list_resources(
        &self,
        manager: &ManagerInner,
        request: pkl_proto::ListResources,
    ) {
        let response = service_list_resources(
            &self.resource_readers,
            self.id,
            request.request_id,
            &request.uri,
        )
        .await;
        let _ = manager
            .send(OutgoingMessage::ListResourcesResponse(response))
            .await;
    }

    pub(crate) async fn handle_list_modules(
        &self,
        manager: &ManagerInner,
        request: pkl_proto::ListModules,
    ) {
        let response =
            service_list_modules(&self.module_readers, self.id, request.request_id, &request.uri)
                .await;
        let _ = manager
            .send(OutgoingMessage::ListModulesResponse(response))
            .await;
    }
}
