//! Message codes of the Pkl server protocol.
//!
//! The first element of every `[code, body]` frame. Codes are stable across
//! protocol versions; new message kinds get new codes.

pub const CREATE_EVALUATOR: i64 = 0x20;
pub const CREATE_EVALUATOR_RESPONSE: i64 = 0x21;
pub const CLOSE_EVALUATOR: i64 = 0x22;
pub const EVALUATE: i64 = 0x23;
pub const EVALUATE_RESPONSE: i64 = 0x24;
pub const LOG: i64 = 0x25;
pub const READ_RESOURCE: i64 = 0x26;
pub const READ_RESOURCE_RESPONSE: i64 = 0x27;
pub const READ_MODULE: i64 = 0x28;
pub const READ_MODULE_RESPONSE: i64 = 0x29;
pub const LIST_RESOURCES: i64 = 0x2a;
pub const LIST_RESOURCES_RESPONSE: i64 = 0x2b;
pub const LIST_MODULES: i64 = 0x2c;
pub const LIST_MODULES_RESPONSE: i64 = 0x2d;
pub const INITIALIZE_MODULE_READER: i64 = 0x2e;
pub const INITIALIZE_MODULE_READER_RESPONSE: i64 = 0x2f;
pub const INITIALIZE_RESOURCE_READER: i64 = 0x30;
pub const INITIALIZE_RESOURCE_READER_RESPONSE: i64 = 0x31;
pub const CLOSE_EXTERNAL_PROCESS: i64 = 0x32;
