//! Messages sent by the host to the evaluator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::code;
use crate::codec::{read_frame_header, write_frame};
use crate::error::ProtoError;
use crate::types::{
    ExternalReaderSpec, Http, ModuleReaderSpec, PathElement, ProjectOrDependency,
    ResourceReaderSpec, TraceMode,
};

/// Request a new evaluator with the given configuration.
///
/// Empty collections and unset options are omitted from the wire so that
/// older backends never see fields they do not understand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateEvaluator {
    pub request_id: i64,
    #[serde(rename = "clientResourceReaders", skip_serializing_if = "Vec::is_empty")]
    pub resource_readers: Vec<ResourceReaderSpec>,
    #[serde(rename = "clientModuleReaders", skip_serializing_if = "Vec::is_empty")]
    pub module_readers: Vec<ModuleReaderSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub module_paths: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectOrDependency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<Http>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub external_module_readers: HashMap<String, ExternalReaderSpec>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub external_resource_readers: HashMap<String, ExternalReaderSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_mode: Option<TraceMode>,
}

/// Tear down an evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloseEvaluator {
    pub evaluator_id: i64,
}

/// Evaluate a module, optionally narrowing to an expression within it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Evaluate {
    pub request_id: i64,
    pub evaluator_id: i64,
    pub module_uri: String,
    /// Inline module text. When empty the backend resolves `module_uri`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub module_text: String,
    /// Expression evaluated against the module. Empty means the module itself.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expr: String,
}

/// Answer to [`crate::ReadResource`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadResourceResponse {
    pub request_id: i64,
    pub evaluator_id: i64,
    #[serde(with = "serde_bytes", skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<u8>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Answer to [`crate::ReadModule`]. Module contents are text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadModuleResponse {
    pub request_id: i64,
    pub evaluator_id: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contents: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Answer to [`crate::ListResources`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListResourcesResponse {
    pub request_id: i64,
    pub evaluator_id: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path_elements: Vec<PathElement>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Answer to [`crate::ListModules`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListModulesResponse {
    pub request_id: i64,
    pub evaluator_id: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path_elements: Vec<PathElement>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Answer to [`crate::InitializeModuleReader`].
///
/// `spec` is absent when no reader is registered for the requested scheme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeModuleReaderResponse {
    pub request_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<ModuleReaderSpec>,
}

/// Answer to [`crate::InitializeResourceReader`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeResourceReaderResponse {
    pub request_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<ResourceReaderSpec>,
}

/// All messages the host can send to the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    CreateEvaluator(Box<CreateEvaluator>),
    CloseEvaluator(CloseEvaluator),
    Evaluate(Evaluate),
    ReadResourceResponse(ReadResourceResponse),
    ReadModuleResponse(ReadModuleResponse),
    ListResourcesResponse(ListResourcesResponse),
    ListModulesResponse(ListModulesResponse),
    InitializeModuleReaderResponse(InitializeModuleReaderResponse),
    InitializeResourceReaderResponse(InitializeResourceReaderResponse),
}

impl OutgoingMessage {
    /// The message code identifying this variant on the wire.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::CreateEvaluator(_) => code::CREATE_EVALUATOR,
            Self::CloseEvaluator(_) => code::CLOSE_EVALUATOR,
            Self::Evaluate(_) => code::EVALUATE,
            Self::ReadResourceResponse(_) => code::READ_RESOURCE_RESPONSE,
            Self::ReadModuleResponse(_) => code::READ_MODULE_RESPONSE,
            Self::ListResourcesResponse(_) => code::LIST_RESOURCES_RESPONSE,
            Self::ListModulesResponse(_) => code::LIST_MODULES_RESPONSE,
            Self::InitializeModuleReaderResponse(_) => code::INITIALIZE_MODULE_READER_RESPONSE,
            Self::InitializeResourceReaderResponse(_) => code::INITIALIZE_RESOURCE_READER_RESPONSE,
        }
    }

    /// Encodes this message as a complete `[code, body]` frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        match self {
            Self::CreateEvaluator(m) => write_frame(self.code(), m.as_ref()),
            Self::CloseEvaluator(m) => write_frame(self.code(), m),
            Self::Evaluate(m) => write_frame(self.code(), m),
            Self::ReadResourceResponse(m) => write_frame(self.code(), m),
            Self::ReadModuleResponse(m) => write_frame(self.code(), m),
            Self::ListResourcesResponse(m) => write_frame(self.code(), m),
            Self::ListModulesResponse(m) => write_frame(self.code(), m),
            Self::InitializeModuleReaderResponse(m) => write_frame(self.code(), m),
            Self::InitializeResourceReaderResponse(m) => write_frame(self.code(), m),
        }
    }

    /// Decodes one complete `[code, body]` frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtoError> {
        let (code, body) = read_frame_header(frame)?;
        match code {
            code::CREATE_EVALUATOR => Ok(Self::CreateEvaluator(Box::new(decode_body(body)?))),
            code::CLOSE_EVALUATOR => Ok(Self::CloseEvaluator(decode_body(body)?)),
            code::EVALUATE => Ok(Self::Evaluate(decode_body(body)?)),
            code::READ_RESOURCE_RESPONSE => Ok(Self::ReadResourceResponse(decode_body(body)?)),
            code::READ_MODULE_RESPONSE => Ok(Self::ReadModuleResponse(decode_body(body)?)),
            code::LIST_RESOURCES_RESPONSE => Ok(Self::ListResourcesResponse(decode_body(body)?)),
            code::LIST_MODULES_RESPONSE => Ok(Self::ListModulesResponse(decode_body(body)?)),
            code::INITIALIZE_MODULE_READER_RESPONSE => {
                Ok(Self::InitializeModuleReaderResponse(decode_body(body)?))
            }
            code::INITIALIZE_RESOURCE_READER_RESPONSE => {
                Ok(Self::InitializeResourceReaderResponse(decode_body(body)?))
            }
            other => Err(ProtoError::UnknownMessageCode(other)),
        }
    }
}

impl From<CreateEvaluator> for OutgoingMessage {
    fn from(msg: CreateEvaluator) -> Self {
        Self::CreateEvaluator(Box::new(msg))
    }
}

fn decode_body<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T, ProtoError> {
    rmp_serde::from_slice(body).map_err(|e| ProtoError::Deserialisation(e.to_string()))
}
