//! The dynamic representation of decoded Pkl values.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::DecodeError;

/// A fully decoded Pkl value.
///
/// `Value` is the target of the envelope reader and the source for typed
/// decoding. `List` covers both `List` and `Listing`, `Map` covers `Map` and
/// `Mapping`; the distinction does not survive the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Key-value pairs in wire order. Keys may be arbitrary values, so this
    /// is a pair list rather than a hash map.
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Pair(Box<(Value, Value)>),
    Duration(Duration),
    DataSize(DataSize),
    Regex(Regex),
    IntSeq(IntSeq),
    Class(ClassInfo),
    TypeAlias(TypeAliasInfo),
    Object(Object),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Linear lookup in a [`Value::Map`].
    #[must_use]
    pub fn map_get(&self, key: &Value) -> Option<&Value> {
        match self {
            Self::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// A short description of the value's kind, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Boolean",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Bytes(_) => "Bytes",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
            Self::Set(_) => "Set",
            Self::Pair(_) => "Pair",
            Self::Duration(_) => "Duration",
            Self::DataSize(_) => "DataSize",
            Self::Regex(_) => "Regex",
            Self::IntSeq(_) => "IntSeq",
            Self::Class(_) => "Class",
            Self::TypeAlias(_) => "TypeAlias",
            Self::Object(_) => "Object",
        }
    }
}

/// A decoded object: the generic container for typed and Dynamic values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    /// URI of the module that defines this object's class.
    pub module_uri: String,
    /// Qualified class name, e.g. `pkl.base#Dynamic`.
    pub name: String,
    /// Named members.
    pub properties: HashMap<String, Value>,
    /// Keyed members. Keys may be arbitrary values.
    pub entries: Vec<(Value, Value)>,
    /// Positional members, in encounter order.
    pub elements: Vec<Value>,
}

impl Object {
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Whether this object is an instance of `pkl.base#Dynamic`.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.module_uri == "pkl:base" && self.name == "Dynamic"
    }
}

/// An amount of time, e.g. `5.min`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Duration {
    pub value: f64,
    pub unit: DurationUnit,
}

impl Duration {
    #[must_use]
    pub fn new(value: f64, unit: DurationUnit) -> Self {
        Self { value, unit }
    }

    /// Total nanoseconds, truncated towards zero.
    #[must_use]
    pub fn total_nanos(&self) -> i64 {
        (self.value * self.unit.nanos() as f64) as i64
    }

    /// Converts to [`std::time::Duration`]. Negative durations clamp to zero.
    #[must_use]
    pub fn to_std(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.total_nanos().max(0) as u64)
    }
}

/// Unit of a [`Duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum DurationUnit {
    #[serde(rename = "ns")]
    Nanoseconds,
    #[serde(rename = "us")]
    Microseconds,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "min")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl DurationUnit {
    /// Nanoseconds in one of this unit.
    #[must_use]
    pub const fn nanos(self) -> i64 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
            Self::Minutes => 60 * 1_000_000_000,
            Self::Hours => 3_600 * 1_000_000_000,
            Self::Days => 86_400 * 1_000_000_000,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nanoseconds => "ns",
            Self::Microseconds => "us",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
            Self::Minutes => "min",
            Self::Hours => "h",
            Self::Days => "d",
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurationUnit {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, DecodeError> {
        match s {
            "ns" => Ok(Self::Nanoseconds),
            "us" => Ok(Self::Microseconds),
            "ms" => Ok(Self::Milliseconds),
            "s" => Ok(Self::Seconds),
            "min" => Ok(Self::Minutes),
            "h" => Ok(Self::Hours),
            "d" => Ok(Self::Days),
            other => Err(DecodeError::UnknownDurationUnit(other.to_owned())),
        }
    }
}

/// A quantity of binary data, e.g. `30.5.mb`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DataSize {
    pub value: f64,
    pub unit: DataSizeUnit,
}

impl DataSize {
    #[must_use]
    pub fn new(value: f64, unit: DataSizeUnit) -> Self {
        Self { value, unit }
    }

    /// Re-expresses this size in the given unit.
    #[must_use]
    pub fn to_unit(&self, unit: DataSizeUnit) -> DataSize {
        DataSize {
            value: self.value * self.unit.bytes() as f64 / unit.bytes() as f64,
            unit,
        }
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.value, self.unit)
    }
}

/// Unit of a [`DataSize`]. SI units scale by 1000, IEC units by 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum DataSizeUnit {
    #[serde(rename = "b")]
    Bytes,
    #[serde(rename = "kb")]
    Kilobytes,
    #[serde(rename = "kib")]
    Kibibytes,
    #[serde(rename = "mb")]
    Megabytes,
    #[serde(rename = "mib")]
    Mebibytes,
    #[serde(rename = "gb")]
    Gigabytes,
    #[serde(rename = "gib")]
    Gibibytes,
    #[serde(rename = "tb")]
    Terabytes,
    #[serde(rename = "tib")]
    Tebibytes,
    #[serde(rename = "pb")]
    Petabytes,
    #[serde(rename = "pib")]
    Pebibytes,
}

impl DataSizeUnit {
    /// Bytes in one of this unit.
    #[must_use]
    pub const fn bytes(self) -> i64 {
        match self {
            Self::Bytes => 1,
            Self::Kilobytes => 1_000,
            Self::Kibibytes => 1 << 10,
            Self::Megabytes => 1_000_000,
            Self::Mebibytes => 1 << 20,
            Self::Gigabytes => 1_000_000_000,
            Self::Gibibytes => 1 << 30,
            Self::Terabytes => 1_000_000_000_000,
            Self::Tebibytes => 1 << 40,
            Self::Petabytes => 1_000_000_000_000_000,
            Self::Pebibytes => 1 << 50,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bytes => "b",
            Self::Kilobytes => "kb",
            Self::Kibibytes => "kib",
            Self::Megabytes => "mb",
            Self::Mebibytes => "mib",
            Self::Gigabytes => "gb",
            Self::Gibibytes => "gib",
            Self::Terabytes => "tb",
            Self::Tebibytes => "tib",
            Self::Petabytes => "pb",
            Self::Pebibytes => "pib",
        }
    }
}

impl fmt::Display for DataSizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSizeUnit {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, DecodeError> {
        match s {
            "b" => Ok(Self::Bytes),
            "kb" => Ok(Self::Kilobytes),
            "kib" => Ok(Self::Kibibytes),
            "mb" => Ok(Self::Megabytes),
            "mib" => Ok(Self::Mebibytes),
            "gb" => Ok(Self::Gigabytes),
            "gib" => Ok(Self::Gibibytes),
            "tb" => Ok(Self::Terabytes),
            "tib" => Ok(Self::Tebibytes),
            "pb" => Ok(Self::Petabytes),
            "pib" => Ok(Self::Pebibytes),
            other => Err(DecodeError::UnknownDataSizeUnit(other.to_owned())),
        }
    }
}

/// A compiled regular expression, carried as its pattern text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Regex {
    pub pattern: String,
}

/// An arithmetic sequence of integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct IntSeq {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

/// Identity of a Pkl class.
///
/// Backends older than 0.30 encode classes without identity; both fields are
/// empty then and are never inferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClassInfo {
    pub module_uri: String,
    pub name: String,
}

/// Identity of a Pkl type alias. Same versioning caveat as [`ClassInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TypeAliasInfo {
    pub module_uri: String,
    pub name: String,
}

/// An ordered pair of values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Pair<A, B> {
    pub first: A,
    pub second: B,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_unit_string_roundtrip() {
        let units = [
            DurationUnit::Nanoseconds,
            DurationUnit::Microseconds,
            DurationUnit::Milliseconds,
            DurationUnit::Seconds,
            DurationUnit::Minutes,
            DurationUnit::Hours,
            DurationUnit::Days,
        ];
        for unit in units {
            assert_eq!(unit.as_str().parse::<DurationUnit>().unwrap(), unit);
        }
        assert!("lightyear".parse::<DurationUnit>().is_err());
    }

    #[test]
    fn data_size_unit_string_roundtrip() {
        let units = [
            DataSizeUnit::Bytes,
            DataSizeUnit::Kilobytes,
            DataSizeUnit::Kibibytes,
            DataSizeUnit::Megabytes,
            DataSizeUnit::Mebibytes,
            DataSizeUnit::Gigabytes,
            DataSizeUnit::Gibibytes,
            DataSizeUnit::Terabytes,
            DataSizeUnit::Tebibytes,
            DataSizeUnit::Petabytes,
            DataSizeUnit::Pebibytes,
        ];
        for unit in units {
            assert_eq!(unit.as_str().parse::<DataSizeUnit>().unwrap(), unit);
        }
    }

    #[test]
    fn duration_conversion_truncates() {
        let d = Duration::new(5.0, DurationUnit::Minutes);
        assert_eq!(d.total_nanos(), 300_000_000_000);
        assert_eq!(d.to_std(), std::time::Duration::from_secs(300));

        let tiny = Duration::new(0.5, DurationUnit::Nanoseconds);
        assert_eq!(tiny.total_nanos(), 0);

        let negative = Duration::new(-1.0, DurationUnit::Seconds);
        assert_eq!(negative.total_nanos(), -1_000_000_000);
        assert_eq!(negative.to_std(), std::time::Duration::ZERO);
    }

    #[test]
    fn data_size_conversion_preserves_byte_count() {
        let size = DataSize::new(2.0, DataSizeUnit::Mebibytes);
        let in_kib = size.to_unit(DataSizeUnit::Kibibytes);
        assert_eq!(in_kib.value, 2048.0);
        assert_eq!(in_kib.unit, DataSizeUnit::Kibibytes);

        let si = DataSize::new(1.0, DataSizeUnit::Gigabytes);
        let in_mb = si.to_unit(DataSizeUnit::Megabytes);
        assert_eq!(in_mb.value, 1000.0);

        // byte count is invariant within float tolerance
        let back = in_mb.to_unit(DataSizeUnit::Gigabytes);
        assert!((back.value - si.value).abs() < 1e-9);
    }

    #[test]
    fn nan_floats_compare_unequal() {
        let a = Value::Float(f64::NAN);
        let b = Value::Float(f64::NAN);
        assert_ne!(a, b);
    }

    #[test]
    fn map_get_finds_by_value_key() {
        let map = Value::Map(vec![
            (Value::Int(1), Value::String("one".into())),
            (Value::String("k".into()), Value::Bool(true)),
        ]);
        assert_eq!(map.map_get(&Value::Int(1)).unwrap().as_str(), Some("one"));
        assert!(map.map_get(&Value::Int(2)).is_none());
    }
}
