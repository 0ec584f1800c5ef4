//! The evaluator manager: one backend, many evaluators.
//!
//! The manager owns exactly one transport and multiplexes every evaluator
//! over it. A dispatch loop routes inbound messages by variant, then by
//! evaluator id, then by request id; a message for an id that is no longer
//! known is logged at warn level and dropped, since the evaluator may have
//! closed concurrently. Transport startup is lazy: the backend is spawned on
//! the first `new_evaluator` call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use pkl_proto::{CloseEvaluator, IncomingMessage, OutgoingMessage};
use semver::Version;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, EvaluatorState};
use crate::module_source::ModuleSource;
use crate::options::EvaluatorOptions;
use crate::project::load_project_from_evaluator;
use crate::transport::{ChildTransport, Transport};

/// Generates a 63-bit random request id.
pub(crate) fn next_request_id() -> i64 {
    (rand::random::<u64>() >> 1) as i64
}

/// Shares one Pkl backend between any number of evaluators.
///
/// Creating evaluators through one manager amortises the backend process
/// over all of them; the standalone [`crate::new_evaluator`] spawns one
/// backend per evaluator instead.
#[derive(Clone)]
pub struct EvaluatorManager {
    inner: Arc<ManagerInner>,
}

impl EvaluatorManager {
    /// A manager backed by the `pkl` executable (see
    /// [`ChildTransport`](crate::ChildTransport) for the lookup order).
    #[must_use]
    pub fn new() -> Self {
        Self::with_transport(Box::new(ChildTransport::new()))
    }

    /// A manager backed by the given command line, e.g.
    /// `vec!["/opt/bin/pkl".into()]`.
    #[must_use]
    pub fn with_command(pkl_command: Vec<String>) -> Self {
        Self::with_transport(Box::new(ChildTransport::with_command(pkl_command)))
    }

    /// A manager over an arbitrary transport. Useful for the native
    /// backend, and for feeding canned responses in tests.
    #[must_use]
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ManagerState {
                    transport,
                    initialized: false,
                    init_failed: false,
                    version: None,
                }),
                sender: OnceLock::new(),
                evaluators: DashMap::new(),
                pending_creates: DashMap::new(),
                interrupts: DashMap::new(),
                interrupt_seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The version of the backend behind this manager.
    pub async fn version(&self) -> Result<Version> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ManagerClosed);
        }
        let mut state = self.inner.state.lock().await;
        state.resolve_version().await
    }

    /// Creates an evaluator with the given options.
    ///
    /// Creations are serialized; the first one starts the backend. A second
    /// start after a failed one is refused.
    pub async fn new_evaluator(&self, options: EvaluatorOptions) -> Result<Evaluator> {
        let mut state = self.inner.state.lock().await;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ManagerClosed);
        }

        if !state.initialized {
            if state.init_failed {
                return Err(Error::Transport(
                    "the backend failed to start previously; create a new manager".into(),
                ));
            }
            match state.transport.start().await {
                Ok(channels) => {
                    let _ = self.inner.sender.set(channels.outgoing);
                    tokio::spawn(dispatch(self.inner.clone(), channels.incoming));
                    tokio::spawn(watch_backend(self.inner.clone(), channels.closed));
                    state.initialized = true;
                }
                Err(e) => {
                    state.init_failed = true;
                    return Err(e);
                }
            }
        }

        let version = state.resolve_version().await?;
        options.check_compatibility(&version)?;

        let request_id = next_request_id();
        let message = options.to_message(request_id);
        let (tx, rx) = oneshot::channel();
        self.inner.pending_creates.insert(request_id, tx);
        let mut guard = self.inner.interrupted_guard(0);
        let interrupted = guard.take_receiver();

        if let Err(e) = self.inner.send(message.into()).await {
            self.inner.pending_creates.remove(&request_id);
            return Err(e);
        }

        let response = tokio::select! {
            response = rx => response.map_err(|_| Error::ManagerClosed)?,
            err = interrupted => return Err(err.unwrap_or(Error::ManagerClosed)),
        };

        if !response.error.is_empty() {
            return Err(Error::CreateEvaluator(response.error));
        }

        let evaluator_state = Arc::new(EvaluatorState {
            id: response.evaluator_id,
            backend_version: version,
            logger: options.logger.clone(),
            resource_readers: options.resource_readers.clone(),
            module_readers: options.module_readers.clone(),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        self.inner
            .evaluators
            .insert(response.evaluator_id, evaluator_state.clone());
        Ok(Evaluator::new(self.inner.clone(), evaluator_state))
    }

    /// Creates an evaluator configured by the project at `project_base_uri`.
    ///
    /// Loads `PklProject` from the base URI through a throwaway evaluator,
    /// then derives evaluator settings and the dependency graph from it.
    /// Dependencies must already be resolved (`pkl project resolve`).
    pub async fn new_project_evaluator(
        &self,
        project_base_uri: &Url,
        options: EvaluatorOptions,
    ) -> Result<Evaluator> {
        let project_evaluator = self.new_evaluator(EvaluatorOptions::preconfigured()).await?;
        let project_uri = join_base_uri(project_base_uri, "PklProject")?;
        let project =
            load_project_from_evaluator(&project_evaluator, &ModuleSource::uri(project_uri)).await;
        let _ = project_evaluator.close().await;
        let project = project?;
        self.new_evaluator(options.with_project(&project)).await
    }

    /// Closes the manager, all of its evaluators, and the backend.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        // politely close evaluators while the backend still listens
        let ids: Vec<i64> = self.inner.evaluators.iter().map(|e| *e.key()).collect();
        for evaluator_id in ids {
            let _ = self
                .inner
                .send(OutgoingMessage::CloseEvaluator(CloseEvaluator { evaluator_id }))
                .await;
        }

        self.inner.shutdown(None);
        if state.initialized {
            state.transport.stop().await;
        }
        Ok(())
    }
}

impl Default for EvaluatorManager {
    fn default() -> Self {
        Self::new()
    }
}

fn join_base_uri(base: &Url, segment: &str) -> Result<Url> {
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), segment);
    Url::parse(&joined).map_err(|e| Error::Internal(format!("invalid project base URI: {e}")))
}

pub(crate) struct ManagerInner {
    state: Mutex<ManagerState>,
    sender: OnceLock<mpsc::Sender<OutgoingMessage>>,
    pub(crate) evaluators: DashMap<i64, Arc<EvaluatorState>>,
    pending_creates: DashMap<i64, oneshot::Sender<pkl_proto::CreateEvaluatorResponse>>,
    interrupts: DashMap<u64, InterruptEntry>,
    interrupt_seq: AtomicU64,
    pub(crate) closed: AtomicBool,
}

struct ManagerState {
    transport: Box<dyn Transport>,
    initialized: bool,
    init_failed: bool,
    version: Option<Version>,
}

impl ManagerState {
    async fn resolve_version(&mut self) -> Result<Version> {
        if let Some(version) = &self.version {
            return Ok(version.clone());
        }
        let version = self.transport.version().await?;
        self.version = Some(version.clone());
        Ok(version)
    }
}

struct InterruptEntry {
    evaluator_id: i64,
    tx: Option<oneshot::Sender<Error>>,
}

/// Removes its interrupt registration when the awaiting call completes.
pub(crate) struct InterruptGuard {
    inner: Arc<ManagerInner>,
    token: u64,
    rx: Option<oneshot::Receiver<Error>>,
}

impl InterruptGuard {
    /// The receiver paired with this registration. Valid to take once.
    pub(crate) fn take_receiver(&mut self) -> oneshot::Receiver<Error> {
        self.rx.take().expect("interrupt receiver already taken")
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.inner.interrupts.remove(&self.token);
    }
}

impl ManagerInner {
    pub(crate) async fn send(&self, message: OutgoingMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ManagerClosed);
        }
        let Some(sender) = self.sender.get() else {
            return Err(Error::ManagerClosed);
        };
        sender
            .send(message)
            .await
            .map_err(|_| Error::ManagerClosed)
    }

    /// Registers an interrupt watcher. `evaluator_id` scopes which
    /// evaluator-close events reach it; manager-wide events reach everyone.
    pub(crate) fn interrupted_guard(self: &Arc<Self>, evaluator_id: i64) -> InterruptGuard {
        let (tx, rx) = oneshot::channel();
        let token = self.interrupt_seq.fetch_add(1, Ordering::Relaxed);
        self.interrupts.insert(
            token,
            InterruptEntry {
                evaluator_id,
                tx: Some(tx),
            },
        );
        InterruptGuard {
            inner: self.clone(),
            token,
            rx: Some(rx),
        }
    }

    /// Publishes an interrupt to every registered watcher.
    fn interrupt_all(&self, make_error: impl Fn() -> Error) {
        let tokens: Vec<u64> = self.interrupts.iter().map(|e| *e.key()).collect();
        for token in tokens {
            if let Some((_, mut entry)) = self.interrupts.remove(&token) {
                if let Some(tx) = entry.tx.take() {
                    let _ = tx.send(make_error());
                }
            }
        }
    }

    /// Publishes an interrupt to watchers scoped to one evaluator.
    pub(crate) fn interrupt_evaluator(&self, evaluator_id: i64) {
        let tokens: Vec<u64> = self
            .interrupts
            .iter()
            .filter(|e| e.value().evaluator_id == evaluator_id)
            .map(|e| *e.key())
            .collect();
        for token in tokens {
            if let Some((_, mut entry)) = self.interrupts.remove(&token) {
                if let Some(tx) = entry.tx.take() {
                    let _ = tx.send(Error::EvaluatorClosed);
                }
            }
        }
    }

    /// Tears down all book-keeping. With `failure` set, every waiter
    /// resolves with that transport error; otherwise with "manager closed".
    pub(crate) fn shutdown(&self, failure: Option<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match failure {
            Some(message) => self.interrupt_all(|| Error::Transport(message.clone())),
            None => self.interrupt_all(|| Error::ManagerClosed),
        }
        for entry in self.evaluators.iter() {
            entry.value().closed.store(true, Ordering::SeqCst);
            entry.value().drain_pending();
        }
        self.evaluators.clear();
        self.pending_creates.clear();
    }
}

/// Routes inbound messages until the transport channel closes.
async fn dispatch(inner: Arc<ManagerInner>, mut incoming: mpsc::Receiver<IncomingMessage>) {
    while let Some(message) = incoming.recv().await {
        // messages arriving after close are dropped silently
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        match message {
            IncomingMessage::CreateEvaluatorResponse(response) => {
                match inner.pending_creates.remove(&response.request_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(response);
                    }
                    None => warn!(
                        request_id = response.request_id,
                        "received a create response for an unknown request id"
                    ),
                }
            }
            IncomingMessage::EvaluateResponse(response) => {
                if let Some(evaluator) = lookup(&inner, response.evaluator_id) {
                    evaluator.handle_evaluate_response(response);
                }
            }
            IncomingMessage::Log(event) => {
                if let Some(evaluator) = lookup(&inner, event.evaluator_id) {
                    evaluator.handle_log(&event);
                }
            }
            IncomingMessage::ReadResource(request) => {
                if let Some(evaluator) = lookup(&inner, request.evaluator_id) {
                    evaluator.handle_read_resource(&inner, request).await;
                }
            }
            IncomingMessage::ReadModule(request) => {
                if let Some(evaluator) = lookup(&inner, request.evaluator_id) {
                    evaluator.handle_read_module(&inner, request).await;
                }
            }
            IncomingMessage::ListResources(request) => {
                if let Some(evaluator) = lookup(&inner, request.evaluator_id) {
                    evaluator.handle_list_resources(&inner, request).await;
                }
            }
            IncomingMessage::ListModules(request) => {
                if let Some(evaluator) = lookup(&inner, request.evaluator_id) {
                    evaluator.handle_list_modules(&inner, request).await;
                }
            }
            // the initialize handshake and process close belong to the
            // external-reader channel, not the server channel
            IncomingMessage::InitializeModuleReader(_)
            | IncomingMessage::InitializeResourceReader(_)
            | IncomingMessage::CloseExternalProcess(_) => {
                warn!("dropping a message that does not belong on the server channel");
            }
        }
    }
}

fn lookup(inner: &Arc<ManagerInner>, evaluator_id: i64) -> Option<Arc<EvaluatorState>> {
    let found = inner.evaluators.get(&evaluator_id).map(|e| e.value().clone());
    if found.is_none() {
        warn!(evaluator_id, "received a message for an unknown evaluator id");
    }
    found
}

/// Reacts to the backend dying out from under the manager.
async fn watch_backend(inner: Arc<ManagerInner>, mut closed: mpsc::Receiver<Error>) {
    if let Some(err) = closed.recv().await {
        if !inner.closed.load(Ordering::SeqCst) {
            warn!("backend terminated: {err}");
            inner.shutdown(Some(err.to_string()));
        }
    }
}
