//! Typed decoding: a `serde::Deserializer` over [`Value`] trees.
//!
//! This is the schema-directed half of the decoder. Struct fields bind to
//! Pkl property names through serde's rename attributes; properties with no
//! matching field are logged and skipped, and nil-valued properties are
//! skipped so the host field keeps its default. Enumerations decode from the
//! raw strings Pkl sends for them.

use serde::de::{
    DeserializeSeed, Deserializer, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor,
};
use serde::forward_to_deserialize_any;

use super::value::Value;
use super::DecodeError;

static NULL: Value = Value::Null;

/// Decodes a [`Value`] into any `Deserialize` type.
pub fn from_value<'de, T: serde::Deserialize<'de>>(value: &'de Value) -> Result<T, DecodeError> {
    T::deserialize(ValueDeserializer { value })
}

#[derive(Clone, Copy)]
struct ValueDeserializer<'de> {
    value: &'de Value,
}

/// One field of a fixed-shape value (Duration, Pair, ...), fed to serde as a
/// map entry.
#[derive(Clone, Copy)]
enum Field<'de> {
    F64(f64),
    I64(i64),
    Str(&'de str),
    Val(&'de Value),
}

impl<'de> ValueDeserializer<'de> {
    fn mismatch(&self, expected: &str) -> DecodeError {
        let found = match self.value {
            Value::Object(obj) if !obj.name.is_empty() => obj.name.clone(),
            other => other.kind().to_owned(),
        };
        DecodeError::TypeMismatch {
            found,
            expected: expected.to_owned(),
        }
    }

    /// The canonical field layout for fixed-shape values, or `None` when the
    /// value has no such layout.
    fn scalar_fields(&self) -> Option<Vec<(&'static str, Field<'de>)>> {
        match self.value {
            Value::Duration(d) => Some(vec![
                ("value", Field::F64(d.value)),
                ("unit", Field::Str(d.unit.as_str())),
            ]),
            Value::DataSize(d) => Some(vec![
                ("value", Field::F64(d.value)),
                ("unit", Field::Str(d.unit.as_str())),
            ]),
            Value::IntSeq(s) => Some(vec![
                ("start", Field::I64(s.start)),
                ("end", Field::I64(s.end)),
                ("step", Field::I64(s.step)),
            ]),
            Value::Regex(r) => Some(vec![("pattern", Field::Str(&r.pattern))]),
            Value::Class(c) => Some(vec![
                ("module_uri", Field::Str(&c.module_uri)),
                ("name", Field::Str(&c.name)),
            ]),
            Value::TypeAlias(t) => Some(vec![
                ("module_uri", Field::Str(&t.module_uri)),
                ("name", Field::Str(&t.name)),
            ]),
            Value::Pair(p) => Some(vec![
                ("first", Field::Val(&p.0)),
                ("second", Field::Val(&p.1)),
            ]),
            _ => None,
        }
    }
}

macro_rules! deserialize_integer {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
            match self.value {
                Value::Int(i) => {
                    let narrowed =
                        <$ty>::try_from(*i).map_err(|_| DecodeError::IntOutOfRange {
                            value: *i,
                            target: stringify!($ty),
                        })?;
                    visitor.$visit(narrowed)
                }
                _ => Err(self.mismatch(stringify!($ty))),
            }
        }
    };
}

impl<'de> Deserializer<'de> for ValueDeserializer<'de> {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(*b),
            Value::Int(i) => visitor.visit_i64(*i),
            Value::Float(f) => visitor.visit_f64(*f),
            Value::String(s) => visitor.visit_borrowed_str(s),
            Value::Bytes(b) => visitor.visit_borrowed_bytes(b),
            Value::List(items) | Value::Set(items) => {
                visitor.visit_seq(SeqDeserializer::new(items.iter().collect()))
            }
            Value::Map(pairs) => visitor.visit_map(PairsDeserializer::new(pairs)),
            Value::Pair(p) => visitor.visit_seq(SeqDeserializer::new(vec![&p.0, &p.1])),
            Value::Object(obj) => {
                visitor.visit_map(PropsDeserializer::new(obj.properties.iter(), false))
            }
            _ => match self.scalar_fields() {
                Some(fields) => visitor.visit_map(FieldsDeserializer::new(fields)),
                None => Err(self.mismatch("a decodable value")),
            },
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Bool(b) => visitor.visit_bool(*b),
            _ => Err(self.mismatch("bool")),
        }
    }

    deserialize_integer!(deserialize_i8, visit_i8, i8);
    deserialize_integer!(deserialize_i16, visit_i16, i16);
    deserialize_integer!(deserialize_i32, visit_i32, i32);
    deserialize_integer!(deserialize_i64, visit_i64, i64);
    deserialize_integer!(deserialize_u8, visit_u8, u8);
    deserialize_integer!(deserialize_u16, visit_u16, u16);
    deserialize_integer!(deserialize_u32, visit_u32, u32);
    deserialize_integer!(deserialize_u64, visit_u64, u64);

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Float(f) => visitor.visit_f32(*f as f32),
            Value::Int(i) => visitor.visit_f32(*i as f32),
            _ => Err(self.mismatch("f32")),
        }
    }

    /// A 64-bit float also accepts an integer: the wire encoding of a Pkl
    /// `Number` may be either.
    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Float(f) => visitor.visit_f64(*f),
            Value::Int(i) => visitor.visit_f64(*i as f64),
            _ => Err(self.mismatch("f64")),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => visitor.visit_char(c),
                    _ => Err(self.mismatch("a single-character string")),
                }
            }
            _ => Err(self.mismatch("char")),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::String(s) => visitor.visit_borrowed_str(s),
            _ => Err(self.mismatch("String")),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Bytes(b) => visitor.visit_borrowed_bytes(b),
            // backends older than 0.29 send byte sequences as integer lists
            Value::List(items) => {
                let mut bytes = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Int(i) => {
                            bytes.push(u8::try_from(*i).map_err(|_| {
                                DecodeError::IntOutOfRange {
                                    value: *i,
                                    target: "u8",
                                }
                            })?);
                        }
                        other => {
                            return Err(DecodeError::TypeMismatch {
                                found: other.kind().to_owned(),
                                expected: "u8".to_owned(),
                            })
                        }
                    }
                }
                visitor.visit_byte_buf(bytes)
            }
            _ => Err(self.mismatch("bytes")),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Null => visitor.visit_unit(),
            _ => Err(self.mismatch("unit")),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::List(items) | Value::Set(items) => {
                visitor.visit_seq(SeqDeserializer::new(items.iter().collect()))
            }
            Value::Pair(p) => visitor.visit_seq(SeqDeserializer::new(vec![&p.0, &p.1])),
            Value::Bytes(b) => visitor.visit_seq(BytesSeqDeserializer { iter: b.iter() }),
            _ => Err(self.mismatch("a sequence")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Map(pairs) => visitor.visit_map(PairsDeserializer::new(pairs)),
            // a set is a mapping to unit
            Value::Set(items) => visitor.visit_map(SetAsMapDeserializer {
                iter: items.iter(),
                pending: false,
            }),
            Value::Object(obj) => {
                visitor.visit_map(PropsDeserializer::new(obj.properties.iter(), false))
            }
            _ => Err(self.mismatch("a map")),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        match self.value {
            Value::Object(obj) => {
                for property in obj.properties.keys() {
                    if !fields.contains(&property.as_str()) {
                        tracing::warn!(
                            property = %property,
                            host_type = name,
                            "no field matching Pkl property; keep the host type in sync or add a #[serde(rename)] tag"
                        );
                    }
                }
                visitor.visit_map(PropsDeserializer::new(obj.properties.iter(), true))
            }
            Value::Map(pairs) => visitor.visit_map(PairsDeserializer::new(pairs)),
            _ => match self.scalar_fields() {
                Some(layout) => visitor.visit_map(FieldsDeserializer::new(layout)),
                None => Err(self.mismatch(name)),
            },
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        match self.value {
            // enumerations arrive as their raw string representation
            Value::String(s) => visitor.visit_enum(StrEnumAccess { variant: s }),
            Value::Map(pairs) if pairs.len() == 1 => visitor.visit_enum(MapEnumAccess {
                key: &pairs[0].0,
                value: &pairs[0].1,
            }),
            _ => Err(self.mismatch(name)),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }
}

struct SeqDeserializer<'de> {
    iter: std::vec::IntoIter<&'de Value>,
}

impl<'de> SeqDeserializer<'de> {
    fn new(items: Vec<&'de Value>) -> Self {
        Self {
            iter: items.into_iter(),
        }
    }
}

impl<'de> SeqAccess<'de> for SeqDeserializer<'de> {
    type Error = DecodeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, DecodeError> {
        self.iter
            .next()
            .map(|value| seed.deserialize(ValueDeserializer { value }))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct BytesSeqDeserializer<'de> {
    iter: std::slice::Iter<'de, u8>,
}

impl<'de> SeqAccess<'de> for BytesSeqDeserializer<'de> {
    type Error = DecodeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, DecodeError> {
        self.iter
            .next()
            .map(|&b| seed.deserialize(I64Deserializer(i64::from(b))))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct PairsDeserializer<'de> {
    iter: std::slice::Iter<'de, (Value, Value)>,
    pending: Option<&'de Value>,
}

impl<'de> PairsDeserializer<'de> {
    fn new(pairs: &'de [(Value, Value)]) -> Self {
        Self {
            iter: pairs.iter(),
            pending: None,
        }
    }
}

impl<'de> MapAccess<'de> for PairsDeserializer<'de> {
    type Error = DecodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, DecodeError> {
        match self.iter.next() {
            Some((key, value)) => {
                self.pending = Some(value);
                seed.deserialize(ValueDeserializer { value: key }).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, DecodeError> {
        let value = self
            .pending
            .take()
            .ok_or_else(|| DecodeError::Message("map value requested before its key".into()))?;
        seed.deserialize(ValueDeserializer { value })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct SetAsMapDeserializer<'de> {
    iter: std::slice::Iter<'de, Value>,
    pending: bool,
}

impl<'de> MapAccess<'de> for SetAsMapDeserializer<'de> {
    type Error = DecodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, DecodeError> {
        match self.iter.next() {
            Some(value) => {
                self.pending = true;
                seed.deserialize(ValueDeserializer { value }).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, DecodeError> {
        if !self.pending {
            return Err(DecodeError::Message(
                "map value requested before its key".into(),
            ));
        }
        self.pending = false;
        seed.deserialize(ValueDeserializer { value: &NULL })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct PropsDeserializer<'de> {
    iter: std::collections::hash_map::Iter<'de, String, Value>,
    pending: Option<&'de Value>,
    skip_null: bool,
}

impl<'de> PropsDeserializer<'de> {
    fn new(iter: std::collections::hash_map::Iter<'de, String, Value>, skip_null: bool) -> Self {
        Self {
            iter,
            pending: None,
            skip_null,
        }
    }
}

impl<'de> MapAccess<'de> for PropsDeserializer<'de> {
    type Error = DecodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, DecodeError> {
        for (key, value) in self.iter.by_ref() {
            // a nil property leaves the host field at its default
            if self.skip_null && matches!(value, Value::Null) {
                continue;
            }
            self.pending = Some(value);
            return seed.deserialize(StrDeserializer(key.as_str())).map(Some);
        }
        Ok(None)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, DecodeError> {
        let value = self
            .pending
            .take()
            .ok_or_else(|| DecodeError::Message("map value requested before its key".into()))?;
        seed.deserialize(ValueDeserializer { value })
    }
}

struct FieldsDeserializer<'de> {
    entries: std::vec::IntoIter<(&'static str, Field<'de>)>,
    pending: Option<Field<'de>>,
}

impl<'de> FieldsDeserializer<'de> {
    fn new(entries: Vec<(&'static str, Field<'de>)>) -> Self {
        Self {
            entries: entries.into_iter(),
            pending: None,
        }
    }
}

impl<'de> MapAccess<'de> for FieldsDeserializer<'de> {
    type Error = DecodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, DecodeError> {
        match self.entries.next() {
            Some((key, field)) => {
                self.pending = Some(field);
                seed.deserialize(StrDeserializer(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, DecodeError> {
        match self.pending.take() {
            Some(Field::F64(f)) => seed.deserialize(F64Deserializer(f)),
            Some(Field::I64(i)) => seed.deserialize(I64Deserializer(i)),
            Some(Field::Str(s)) => seed.deserialize(StrDeserializer(s)),
            Some(Field::Val(value)) => seed.deserialize(ValueDeserializer { value }),
            None => Err(DecodeError::Message(
                "map value requested before its key".into(),
            )),
        }
    }
}

struct StrEnumAccess<'de> {
    variant: &'de str,
}

impl<'de> EnumAccess<'de> for StrEnumAccess<'de> {
    type Error = DecodeError;
    type Variant = UnitOnlyVariant;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, UnitOnlyVariant), DecodeError> {
        let variant = seed.deserialize(StrDeserializer(self.variant))?;
        Ok((variant, UnitOnlyVariant))
    }
}

struct UnitOnlyVariant;

impl<'de> VariantAccess<'de> for UnitOnlyVariant {
    type Error = DecodeError;

    fn unit_variant(self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, _seed: T) -> Result<T::Value, DecodeError> {
        Err(DecodeError::Message(
            "string-encoded enums only support unit variants".into(),
        ))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, _visitor: V) -> Result<V::Value, DecodeError> {
        Err(DecodeError::Message(
            "string-encoded enums only support unit variants".into(),
        ))
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, DecodeError> {
        Err(DecodeError::Message(
            "string-encoded enums only support unit variants".into(),
        ))
    }
}

struct MapEnumAccess<'de> {
    key: &'de Value,
    value: &'de Value,
}

impl<'de> EnumAccess<'de> for MapEnumAccess<'de> {
    type Error = DecodeError;
    type Variant = ValueVariantAccess<'de>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, ValueVariantAccess<'de>), DecodeError> {
        let variant = seed.deserialize(ValueDeserializer { value: self.key })?;
        Ok((variant, ValueVariantAccess { value: self.value }))
    }
}

struct ValueVariantAccess<'de> {
    value: &'de Value,
}

impl<'de> VariantAccess<'de> for ValueVariantAccess<'de> {
    type Error = DecodeError;

    fn unit_variant(self) -> Result<(), DecodeError> {
        match self.value {
            Value::Null => Ok(()),
            other => Err(DecodeError::TypeMismatch {
                found: other.kind().to_owned(),
                expected: "unit variant".to_owned(),
            }),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, DecodeError> {
        seed.deserialize(ValueDeserializer { value: self.value })
    }

    fn tuple_variant<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value, DecodeError> {
        ValueDeserializer { value: self.value }.deserialize_tuple(len, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        ValueDeserializer { value: self.value }.deserialize_struct("", fields, visitor)
    }
}

struct F64Deserializer(f64);

impl<'de> Deserializer<'de> for F64Deserializer {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_f64(self.0)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

struct I64Deserializer(i64);

impl<'de> Deserializer<'de> for I64Deserializer {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_i64(self.0)
    }

    fn deserialize_u8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        let b = u8::try_from(self.0).map_err(|_| DecodeError::IntOutOfRange {
            value: self.0,
            target: "u8",
        })?;
        visitor.visit_u8(b)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

struct StrDeserializer<'de>(&'de str);

impl<'de> Deserializer<'de> for StrDeserializer<'de> {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_borrowed_str(self.0)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_enum(StrEnumAccess { variant: self.0 })
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}
