//! The process-wide polymorphism registry.
//!
//! Pkl class hierarchies are open: a property declared as `Animal` may hold
//! a `Dog` at runtime. The registry maps qualified Pkl class names to host
//! types so that dynamically-classed values can be decoded into the host
//! type registered for the class actually present on the wire.
//!
//! Registration is write-only and process-scoped. Register mappings once at
//! program start, before evaluating; there is no unregistration.

use std::any::Any;
use std::sync::OnceLock;

use dashmap::DashMap;
use serde::de::DeserializeOwned;

use super::typed::from_value;
use super::value::Value;
use super::DecodeError;

type DecodeFn = fn(&Value) -> Result<Box<dyn Any + Send + Sync>, DecodeError>;

static MAPPINGS: OnceLock<DashMap<String, DecodeFn>> = OnceLock::new();

fn mappings() -> &'static DashMap<String, DecodeFn> {
    MAPPINGS.get_or_init(DashMap::new)
}

/// Registers `T` as the host type for a qualified Pkl class name, e.g.
/// `"com.example.pets#Dog"`.
pub fn register_mapping<T>(qualified_name: impl Into<String>)
where
    T: DeserializeOwned + Any + Send + Sync,
{
    mappings().insert(qualified_name.into(), decode_erased::<T>);
}

fn decode_erased<T>(value: &Value) -> Result<Box<dyn Any + Send + Sync>, DecodeError>
where
    T: DeserializeOwned + Any + Send + Sync,
{
    Ok(Box::new(from_value::<T>(value)?))
}

/// Whether a mapping is registered for the qualified class name.
#[must_use]
pub fn is_registered(qualified_name: &str) -> bool {
    mappings().contains_key(qualified_name)
}

/// Decodes an object value through the registry, dispatching on the
/// qualified class name it arrived with.
///
/// Returns `None` when the value is not an object or its class has no
/// registered mapping. Downcast the box to the registered host type.
pub fn decode_registered(value: &Value) -> Option<Result<Box<dyn Any + Send + Sync>, DecodeError>> {
    let Value::Object(obj) = value else {
        return None;
    };
    let decode = *mappings().get(obj.name.as_str())?;
    Some(decode(value))
}
