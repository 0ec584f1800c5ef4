//! Messages sent by the evaluator to the host.

use serde::{Deserialize, Serialize};

use crate::code;
use crate::codec::{read_frame_header, write_frame};
use crate::error::ProtoError;

/// Response to [`crate::CreateEvaluator`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateEvaluatorResponse {
    pub request_id: i64,
    /// Backend-assigned id for the new evaluator. Only meaningful when
    /// `error` is empty.
    pub evaluator_id: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Response to [`crate::Evaluate`], carrying the binary value envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluateResponse {
    pub request_id: i64,
    pub evaluator_id: i64,
    #[serde(with = "serde_bytes", skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<u8>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// A log event emitted during evaluation.
///
/// `level` is [`crate::LOG_LEVEL_TRACE`] or [`crate::LOG_LEVEL_WARN`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Log {
    pub evaluator_id: i64,
    pub level: i32,
    pub message: String,
    pub frame_uri: String,
}

/// Ask the host to read a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadResource {
    pub request_id: i64,
    pub evaluator_id: i64,
    pub uri: String,
}

/// Ask the host to read a module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadModule {
    pub request_id: i64,
    pub evaluator_id: i64,
    pub uri: String,
}

/// Ask the host to list resources below a base URI (globbing).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListResources {
    pub request_id: i64,
    pub evaluator_id: i64,
    pub uri: String,
}

/// Ask the host to list modules below a base URI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListModules {
    pub request_id: i64,
    pub evaluator_id: i64,
    pub uri: String,
}

/// Ask an external reader process for its module reader spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeModuleReader {
    pub request_id: i64,
    pub scheme: String,
}

/// Ask an external reader process for its resource reader spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeResourceReader {
    pub request_id: i64,
    pub scheme: String,
}

/// Tell an external reader process to shut down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloseExternalProcess {}

/// All messages the evaluator can send to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    CreateEvaluatorResponse(CreateEvaluatorResponse),
    EvaluateResponse(EvaluateResponse),
    Log(Log),
    ReadResource(ReadResource),
    ReadModule(ReadModule),
    ListResources(ListResources),
    ListModules(ListModules),
    InitializeModuleReader(InitializeModuleReader),
    InitializeResourceReader(InitializeResourceReader),
    CloseExternalProcess(CloseExternalProcess),
}

impl IncomingMessage {
    /// The message code identifying this variant on the wire.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::CreateEvaluatorResponse(_) => code::CREATE_EVALUATOR_RESPONSE,
            Self::EvaluateResponse(_) => code::EVALUATE_RESPONSE,
            Self::Log(_) => code::LOG,
            Self::ReadResource(_) => code::READ_RESOURCE,
            Self::ReadModule(_) => code::READ_MODULE,
            Self::ListResources(_) => code::LIST_RESOURCES,
            Self::ListModules(_) => code::LIST_MODULES,
            Self::InitializeModuleReader(_) => code::INITIALIZE_MODULE_READER,
            Self::InitializeResourceReader(_) => code::INITIALIZE_RESOURCE_READER,
            Self::CloseExternalProcess(_) => code::CLOSE_EXTERNAL_PROCESS,
        }
    }

    /// Decodes one complete `[code, body]` frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtoError> {
        let (code, body) = read_frame_header(frame)?;
        match code {
            code::CREATE_EVALUATOR_RESPONSE => {
                Ok(Self::CreateEvaluatorResponse(decode_body(body)?))
            }
            code::EVALUATE_RESPONSE => Ok(Self::EvaluateResponse(decode_body(body)?)),
            code::LOG => Ok(Self::Log(decode_body(body)?)),
            code::READ_RESOURCE => Ok(Self::ReadResource(decode_body(body)?)),
            code::READ_MODULE => Ok(Self::ReadModule(decode_body(body)?)),
            code::LIST_RESOURCES => Ok(Self::ListResources(decode_body(body)?)),
            code::LIST_MODULES => Ok(Self::ListModules(decode_body(body)?)),
            code::INITIALIZE_MODULE_READER => Ok(Self::InitializeModuleReader(decode_body(body)?)),
            code::INITIALIZE_RESOURCE_READER => {
                Ok(Self::InitializeResourceReader(decode_body(body)?))
            }
            code::CLOSE_EXTERNAL_PROCESS => Ok(Self::CloseExternalProcess(decode_body(body)?)),
            other => Err(ProtoError::UnknownMessageCode(other)),
        }
    }

    /// Encodes this message as a complete `[code, body]` frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        match self {
            Self::CreateEvaluatorResponse(m) => write_frame(self.code(), m),
            Self::EvaluateResponse(m) => write_frame(self.code(), m),
            Self::Log(m) => write_frame(self.code(), m),
            Self::ReadResource(m) => write_frame(self.code(), m),
            Self::ReadModule(m) => write_frame(self.code(), m),
            Self::ListResources(m) => write_frame(self.code(), m),
            Self::ListModules(m) => write_frame(self.code(), m),
            Self::InitializeModuleReader(m) => write_frame(self.code(), m),
            Self::InitializeResourceReader(m) => write_frame(self.code(), m),
            Self::CloseExternalProcess(m) => write_frame(self.code(), m),
        }
    }
}

fn decode_body<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T, ProtoError> {
    rmp_serde::from_slice(body).map_err(|e| ProtoError::Deserialisation(e.to_string()))
}
