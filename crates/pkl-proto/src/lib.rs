//! Wire protocol types for talking to a Pkl evaluator backend.
//!
//! The Pkl server protocol is a bidirectional stream of MessagePack values.
//! Every message is a two-element array `[code, body]` where `code` is a
//! small integer identifying the message variant and `body` is a MessagePack
//! map keyed by camelCase field names. Frames carry no extra length prefix;
//! MessagePack values are self-delimiting.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ fixarray(2)                                  │
//! ├──────────────┬───────────────────────────────┤
//! │  code (int)  │  body (map of named fields)   │
//! └──────────────┴───────────────────────────────┘
//! ```
//!
//! Direction is named from the host's point of view: [`OutgoingMessage`]
//! travels host → evaluator, [`IncomingMessage`] travels evaluator → host.
//! Both directions implement encode *and* decode because an external reader
//! process speaks the protocol with the roles reversed, and because tests
//! replay canned frames from either side.
//!
//! Requests carry a `requestId`; responses echo it. Evaluator-scoped
//! messages additionally carry an `evaluatorId`. A non-empty `error` field
//! in a response means failure; an absent or empty one means success.
//! Unknown body fields are ignored on decode so that newer backends can
//! extend messages without breaking older hosts.

pub mod code;
pub mod codec;
mod error;
mod incoming;
mod outgoing;
mod types;

pub use codec::{msgpack_element_size, MessageCodec, MAX_MESSAGE_SIZE};
pub use error::ProtoError;
pub use incoming::{
    CloseExternalProcess, CreateEvaluatorResponse, EvaluateResponse, IncomingMessage,
    InitializeModuleReader, InitializeResourceReader, ListModules, ListResources, Log, ReadModule,
    ReadResource,
};
pub use outgoing::{
    CloseEvaluator, CreateEvaluator, Evaluate, InitializeModuleReaderResponse,
    InitializeResourceReaderResponse, ListModulesResponse, ListResourcesResponse,
    OutgoingMessage, ReadModuleResponse, ReadResourceResponse,
};
pub use types::{
    Checksums, ExternalReaderSpec, Http, ModuleReaderSpec, PathElement, ProjectOrDependency,
    Proxy, ResourceReaderSpec, TraceMode,
};

/// Log level carried by [`Log`] messages: the evaluator's `trace()` output.
pub const LOG_LEVEL_TRACE: i32 = 0;

/// Log level carried by [`Log`] messages: the evaluator's warnings.
pub const LOG_LEVEL_WARN: i32 = 1;
