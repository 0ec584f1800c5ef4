//! Transport abstraction over the Pkl backend.
//!
//! Provides a unified interface whether Pkl runs as a child process speaking
//! the server protocol on its stdio, or as the linked `libpkl` native
//! library (behind the `libpkl` feature).

mod child;
#[cfg(feature = "libpkl")]
mod native;

use async_trait::async_trait;
use pkl_proto::{IncomingMessage, OutgoingMessage};
use semver::Version;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

pub use child::ChildTransport;
#[cfg(feature = "libpkl")]
pub use native::NativeTransport;

/// The channel ends a started transport hands to its owner.
pub struct TransportChannels {
    /// Messages to deliver to the backend.
    pub outgoing: mpsc::Sender<OutgoingMessage>,
    /// Messages arriving from the backend.
    pub incoming: mpsc::Receiver<IncomingMessage>,
    /// Delivers a single error when the backend terminates on its own.
    /// Stays silent for a stop requested through [`Transport::stop`].
    pub closed: mpsc::Receiver<Error>,
}

/// A connection to one Pkl backend.
#[async_trait]
pub trait Transport: Send {
    /// Starts the backend and returns its message channels.
    async fn start(&mut self) -> Result<TransportChannels>;

    /// The backend's version, probed without starting it if possible.
    async fn version(&mut self) -> Result<Version>;

    /// Stops the backend, draining its channels. Idempotent.
    async fn stop(&mut self);
}
