//! The native transport over the `libpkl` C library.
//!
//! Instead of a child process, the backend runs in-process: frames are
//! handed to `pkl_send_message` and arrive back through a registered
//! callback. Linking requires `-lpkl`; enable the `libpkl` cargo feature
//! and make the library visible to the linker.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pkl_proto::{IncomingMessage, OutgoingMessage};
use semver::Version;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Transport, TransportChannels};
use crate::error::{Error, Result};
use crate::version::parse_version_output;

type MessageHandler = unsafe extern "C" fn(length: c_int, message: *const c_char, user_data: *mut c_void);

extern "C" {
    fn pkl_init(handler: MessageHandler, user_data: *mut c_void) -> *mut c_void;
    fn pkl_send_message(exec: *mut c_void, length: c_int, message: *const c_char) -> c_int;
    fn pkl_version(exec: *mut c_void) -> *const c_char;
    fn pkl_close(exec: *mut c_void) -> c_int;
}

struct CallbackState {
    incoming: mpsc::Sender<IncomingMessage>,
    closed: mpsc::Sender<Error>,
    exited: Arc<AtomicBool>,
}

unsafe extern "C" fn message_handler(length: c_int, message: *const c_char, user_data: *mut c_void) {
    let state = &*(user_data as *const CallbackState);
    if state.exited.load(Ordering::SeqCst) || message.is_null() || length < 0 {
        return;
    }
    let frame = std::slice::from_raw_parts(message as *const u8, length as usize);
    match IncomingMessage::decode(frame) {
        Ok(msg) => {
            // called from a libpkl thread, never from the tokio runtime
            if state.incoming.blocking_send(msg).is_err() {
                warn!("dropping message received after the native transport shut down");
            }
        }
        Err(e) => {
            let _ = state
                .closed
                .try_send(Error::Transport(format!("failed to decode a libpkl message: {e}")));
        }
    }
}

/// Raw library handle. libpkl serialises message handling internally.
struct ExecHandle(*mut c_void);

// the handle is an opaque token the library accepts from any thread
unsafe impl Send for ExecHandle {}

/// Runs Pkl through the linked `libpkl` library.
pub struct NativeTransport {
    exec: Option<ExecHandle>,
    state: Option<Box<CallbackState>>,
    version: Option<Version>,
    exited: Arc<AtomicBool>,
}

impl NativeTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            exec: None,
            state: None,
            version: None,
            exited: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn start(&mut self) -> Result<TransportChannels> {
        let (out_tx, mut out_rx) = mpsc::channel::<OutgoingMessage>(32);
        let (in_tx, in_rx) = mpsc::channel(32);
        let (closed_tx, closed_rx) = mpsc::channel(1);

        let state = Box::new(CallbackState {
            incoming: in_tx,
            closed: closed_tx.clone(),
            exited: self.exited.clone(),
        });
        let user_data = &*state as *const CallbackState as *mut c_void;

        let exec = unsafe { pkl_init(message_handler, user_data) };
        if exec.is_null() {
            return Err(Error::Transport("pkl_init failed".into()));
        }
        debug!("initialised the libpkl backend");

        let handle = ExecHandle(exec);
        let exec_ptr = handle.0 as usize;
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let frame = match msg.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = closed_tx.try_send(Error::Proto(e));
                        break;
                    }
                };
                let result = unsafe {
                    pkl_send_message(
                        exec_ptr as *mut c_void,
                        frame.len() as c_int,
                        frame.as_ptr() as *const c_char,
                    )
                };
                if result == -1 {
                    let _ = closed_tx.try_send(Error::Transport("pkl_send_message failed".into()));
                    break;
                }
            }
        });

        self.exec = Some(handle);
        self.state = Some(state);
        Ok(TransportChannels {
            outgoing: out_tx,
            incoming: in_rx,
            closed: closed_rx,
        })
    }

    async fn version(&mut self) -> Result<Version> {
        if let Some(version) = &self.version {
            return Ok(version.clone());
        }
        let exec = self
            .exec
            .as_ref()
            .ok_or_else(|| Error::Transport("the native transport has not been started".into()))?;
        let banner = unsafe {
            let raw = pkl_version(exec.0);
            if raw.is_null() {
                return Err(Error::Transport("pkl_version returned null".into()));
            }
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        };
        let version = parse_version_output(&format!("Pkl {banner}"))
            .or_else(|| Version::parse(&banner).ok())
            .ok_or_else(|| {
                Error::Transport(format!("failed to parse libpkl version \"{banner}\""))
            })?;
        self.version = Some(version.clone());
        Ok(version)
    }

    async fn stop(&mut self) {
        self.exited.store(true, Ordering::SeqCst);
        if let Some(exec) = self.exec.take() {
            let result = unsafe { pkl_close(exec.0) };
            if result == -1 {
                warn!("pkl_close reported a failure");
            }
        }
        // keep the callback state alive until after pkl_close returns
        self.state.take();
    }
}
