//! A scripted in-memory backend for exercising the manager and evaluators
//! without a Pkl installation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pkl::proto::{
    CreateEvaluatorResponse, EvaluateResponse, IncomingMessage, OutgoingMessage,
};
use pkl::{Error, Result, Transport, TransportChannels};
use semver::Version;
use tokio::sync::mpsc;

/// Maps each message the host sends to the messages the backend answers
/// with. State lives in captured `Mutex`es.
pub type Script = Arc<dyn Fn(OutgoingMessage) -> Vec<IncomingMessage> + Send + Sync>;

pub struct FakeTransport {
    version: Version,
    script: Script,
    death: Arc<Mutex<Option<mpsc::Sender<Error>>>>,
}

/// Lets a test simulate the backend dying mid-flight.
#[derive(Clone)]
pub struct DeathHandle {
    death: Arc<Mutex<Option<mpsc::Sender<Error>>>>,
}

impl DeathHandle {
    pub async fn kill(&self, message: &str) {
        let sender = self.death.lock().unwrap().take();
        if let Some(sender) = sender {
            let _ = sender.send(Error::Transport(message.to_owned())).await;
        }
    }
}

impl FakeTransport {
    pub fn new(version: Version, script: Script) -> Self {
        Self {
            version,
            script,
            death: Arc::new(Mutex::new(None)),
        }
    }

    pub fn death_handle(&self) -> DeathHandle {
        DeathHandle {
            death: self.death.clone(),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start(&mut self) -> Result<TransportChannels> {
        let (out_tx, mut out_rx) = mpsc::channel(32);
        let (in_tx, in_rx) = mpsc::channel(32);
        let (closed_tx, closed_rx) = mpsc::channel(1);
        *self.death.lock().unwrap() = Some(closed_tx);

        let script = self.script.clone();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                for response in script(message) {
                    if in_tx.send(response).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(TransportChannels {
            outgoing: out_tx,
            incoming: in_rx,
            closed: closed_rx,
        })
    }

    async fn version(&mut self) -> Result<Version> {
        Ok(self.version.clone())
    }

    async fn stop(&mut self) {}
}

/// A backend that assigns evaluator ids sequentially and answers every
/// evaluate through `on_evaluate`.
pub fn scripted_backend(
    on_evaluate: impl Fn(&pkl::proto::Evaluate) -> EvaluateResponse + Send + Sync + 'static,
) -> Script {
    let next_evaluator_id = Mutex::new(1i64);
    Arc::new(move |message| match message {
        OutgoingMessage::CreateEvaluator(create) => {
            let mut next = next_evaluator_id.lock().unwrap();
            let evaluator_id = *next;
            *next += 1;
            vec![IncomingMessage::CreateEvaluatorResponse(
                CreateEvaluatorResponse {
                    request_id: create.request_id,
                    evaluator_id,
                    error: String::new(),
                },
            )]
        }
        OutgoingMessage::Evaluate(evaluate) => {
            vec![IncomingMessage::EvaluateResponse(on_evaluate(&evaluate))]
        }
        _ => Vec::new(),
    })
}

/// Encodes a string as a value envelope, the way the backend ships
/// `output.text` results.
pub fn pack_str(s: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    rmp::encode::write_str(&mut buf, s).unwrap();
    buf
}

/// An `EvaluateResponse` carrying a successful result.
pub fn ok_response(evaluate: &pkl::proto::Evaluate, result: Vec<u8>) -> EvaluateResponse {
    EvaluateResponse {
        request_id: evaluate.request_id,
        evaluator_id: evaluate.evaluator_id,
        result,
        error: String::new(),
    }
}
