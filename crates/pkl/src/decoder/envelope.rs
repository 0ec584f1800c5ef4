//! The envelope reader: binary bytes to [`Value`] trees.
//!
//! Composite Pkl values are encoded as arrays whose first element is an
//! object code describing the kind. For forward compatibility the reader
//! consumes the fields it knows for each code and skips any the array
//! declares beyond them.

use std::collections::HashMap;

use rmp::decode::Bytes;
use rmp::Marker;

use super::value::{
    ClassInfo, DataSize, Duration, IntSeq, Object, Regex, TypeAliasInfo, Value,
};
use super::DecodeError;

const CODE_OBJECT: i64 = 0x01;
const CODE_MAP: i64 = 0x02;
const CODE_MAPPING: i64 = 0x03;
const CODE_LIST: i64 = 0x04;
const CODE_LISTING: i64 = 0x05;
const CODE_SET: i64 = 0x06;
const CODE_DURATION: i64 = 0x07;
const CODE_DATA_SIZE: i64 = 0x08;
const CODE_PAIR: i64 = 0x09;
const CODE_INT_SEQ: i64 = 0x0A;
const CODE_REGEX: i64 = 0x0B;
const CODE_CLASS: i64 = 0x0C;
const CODE_TYPE_ALIAS: i64 = 0x0D;
const CODE_FUNCTION: i64 = 0x0E;
const CODE_BYTES: i64 = 0x0F;
const CODE_MEMBER_PROPERTY: i64 = 0x10;
const CODE_MEMBER_ENTRY: i64 = 0x11;
const CODE_MEMBER_ELEMENT: i64 = 0x12;

/// Decodes one complete value envelope.
pub fn decode_value(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut reader = EnvelopeReader::new(bytes);
    reader.read_value()
}

struct EnvelopeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> EnvelopeReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn peek_marker(&self) -> Result<Marker, DecodeError> {
        self.rest()
            .first()
            .map(|&b| Marker::from_u8(b))
            .ok_or(DecodeError::Truncated)
    }

    /// Runs an rmp read against the remaining bytes and advances past what
    /// it consumed.
    fn with<T>(
        &mut self,
        f: impl FnOnce(&mut Bytes<'a>) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        let mut rd = Bytes::new(self.rest());
        let out = f(&mut rd)?;
        self.pos = self.buf.len() - rd.remaining_slice().len();
        Ok(out)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.rest().len() < n {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array_len(&mut self) -> Result<usize, DecodeError> {
        self.with(|rd| {
            rmp::decode::read_array_len(rd)
                .map(|n| n as usize)
                .map_err(|e| DecodeError::Malformed(format!("expected an array: {e:?}")))
        })
    }

    fn read_map_len(&mut self) -> Result<usize, DecodeError> {
        self.with(|rd| {
            rmp::decode::read_map_len(rd)
                .map(|n| n as usize)
                .map_err(|e| DecodeError::Malformed(format!("expected a map: {e:?}")))
        })
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.with(|rd| {
            rmp::decode::read_int(rd)
                .map_err(|e| DecodeError::Malformed(format!("expected an integer: {e:?}")))
        })
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        self.with(|rd| {
            rmp::decode::read_bool(rd)
                .map_err(|e| DecodeError::Malformed(format!("expected a boolean: {e:?}")))
        })
    }

    /// Reads a float, also accepting an integer. The wire encoding of a Pkl
    /// `Number` may be either.
    fn read_f64_lenient(&mut self) -> Result<f64, DecodeError> {
        match self.peek_marker()? {
            Marker::F64 => self.with(|rd| {
                rmp::decode::read_f64(rd)
                    .map_err(|e| DecodeError::Malformed(format!("expected a float: {e:?}")))
            }),
            Marker::F32 => self.with(|rd| {
                rmp::decode::read_f32(rd)
                    .map(f64::from)
                    .map_err(|e| DecodeError::Malformed(format!("expected a float: {e:?}")))
            }),
            _ => Ok(self.read_i64()? as f64),
        }
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.with(|rd| {
            rmp::decode::read_str_len(rd)
                .map(|n| n as usize)
                .map_err(|e| DecodeError::Malformed(format!("expected a string: {e:?}")))
        })?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8 in string: {e}")))
    }

    fn read_bin(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.with(|rd| {
            rmp::decode::read_bin_len(rd)
                .map(|n| n as usize)
                .map_err(|e| DecodeError::Malformed(format!("expected binary data: {e:?}")))
        })?;
        Ok(self.take(len)?.to_vec())
    }

    /// Skips `count` whole MessagePack elements.
    fn skip_elements(&mut self, count: usize) -> Result<(), DecodeError> {
        for _ in 0..count {
            match pkl_proto::msgpack_element_size(self.rest()) {
                Ok(Some(size)) => self.pos += size,
                Ok(None) => return Err(DecodeError::Truncated),
                Err(e) => return Err(DecodeError::Malformed(e.to_string())),
            }
        }
        Ok(())
    }

    fn read_value(&mut self) -> Result<Value, DecodeError> {
        match self.peek_marker()? {
            Marker::Null => {
                self.skip_elements(1)?;
                Ok(Value::Null)
            }
            Marker::True | Marker::False => Ok(Value::Bool(self.read_bool()?)),
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::U64
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64 => Ok(Value::Int(self.read_i64()?)),
            Marker::F32 | Marker::F64 => Ok(Value::Float(self.read_f64_lenient()?)),
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                Ok(Value::String(self.read_string()?))
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => Ok(Value::Bytes(self.read_bin()?)),
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => self.read_composite(),
            other => Err(DecodeError::Malformed(format!(
                "unexpected marker {other:?} in value position"
            ))),
        }
    }

    /// Reads an `[code, fields...]` envelope array.
    fn read_composite(&mut self) -> Result<Value, DecodeError> {
        let length = self.read_array_len()?;
        if length == 0 {
            return Err(DecodeError::Malformed("empty envelope array".into()));
        }
        let code = self.read_i64()?;

        // consumed counts envelope fields read beyond the code itself
        let (value, consumed) = match code {
            CODE_OBJECT => (Value::Object(self.read_object()?), 3),
            CODE_MAP | CODE_MAPPING => {
                let len = self.read_map_len()?;
                let mut pairs = Vec::with_capacity(len);
                for _ in 0..len {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    pairs.push((key, value));
                }
                (Value::Map(pairs), 1)
            }
            CODE_LIST | CODE_LISTING => (Value::List(self.read_value_array()?), 1),
            CODE_SET => (Value::Set(self.read_value_array()?), 1),
            CODE_DURATION => {
                let value = self.read_f64_lenient()?;
                let unit = self.read_string()?.parse()?;
                (Value::Duration(Duration { value, unit }), 2)
            }
            CODE_DATA_SIZE => {
                let value = self.read_f64_lenient()?;
                let unit = self.read_string()?.parse()?;
                (Value::DataSize(DataSize { value, unit }), 2)
            }
            CODE_PAIR => {
                let first = self.read_value()?;
                let second = self.read_value()?;
                (Value::Pair(Box::new((first, second))), 2)
            }
            CODE_INT_SEQ => {
                let start = self.read_i64()?;
                let end = self.read_i64()?;
                let step = self.read_i64()?;
                (Value::IntSeq(IntSeq { start, end, step }), 3)
            }
            CODE_REGEX => {
                let pattern = self.read_string()?;
                (Value::Regex(Regex { pattern }), 1)
            }
            CODE_CLASS => {
                let (info, consumed) = self.read_type_identity(length)?;
                (
                    Value::Class(ClassInfo {
                        module_uri: info.0,
                        name: info.1,
                    }),
                    consumed,
                )
            }
            CODE_TYPE_ALIAS => {
                let (info, consumed) = self.read_type_identity(length)?;
                (
                    Value::TypeAlias(TypeAliasInfo {
                        module_uri: info.0,
                        name: info.1,
                    }),
                    consumed,
                )
            }
            CODE_BYTES => (Value::Bytes(self.read_bin()?), 1),
            CODE_FUNCTION => {
                return Err(DecodeError::UnexpectedCode {
                    code,
                    expected: "a data value (functions cannot cross the boundary)",
                })
            }
            other => {
                return Err(DecodeError::UnexpectedCode {
                    code: other,
                    expected: "a known value envelope",
                })
            }
        };

        let trailing = length
            .checked_sub(1 + consumed)
            .ok_or_else(|| DecodeError::Malformed(format!("envelope for code {code:#04x} is too short")))?;
        self.skip_elements(trailing)?;
        Ok(value)
    }

    /// Class and type alias identity: qualified name plus module URI on
    /// Pkl 0.30+, nothing on older backends.
    fn read_type_identity(
        &mut self,
        length: usize,
    ) -> Result<((String, String), usize), DecodeError> {
        if length >= 3 {
            let name = self.read_string()?;
            let module_uri = self.read_string()?;
            Ok(((module_uri, name), 2))
        } else {
            Ok(((String::new(), String::new()), 0))
        }
    }

    fn read_value_array(&mut self) -> Result<Vec<Value>, DecodeError> {
        let len = self.read_array_len()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        Ok(items)
    }

    fn read_object(&mut self) -> Result<Object, DecodeError> {
        let name = self.read_string()?;
        let module_uri = self.read_string()?;
        let member_count = self.read_array_len()?;

        let mut properties = HashMap::new();
        let mut entries = Vec::new();
        let mut elements = Vec::new();

        for _ in 0..member_count {
            let member_len = self.read_array_len()?;
            if member_len == 0 {
                return Err(DecodeError::Malformed("empty object member".into()));
            }
            let member_code = self.read_i64()?;
            let consumed = match member_code {
                CODE_MEMBER_PROPERTY => {
                    let property = self.read_string()?;
                    let value = self.read_value()?;
                    properties.insert(property, value);
                    2
                }
                CODE_MEMBER_ENTRY => {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    entries.push((key, value));
                    2
                }
                CODE_MEMBER_ELEMENT => {
                    // index is decoded but not preserved; elements keep
                    // encounter order
                    let _index = self.read_i64()?;
                    let value = self.read_value()?;
                    elements.push(value);
                    2
                }
                other => {
                    tracing::warn!(code = other, "skipping unknown object member kind");
                    0
                }
            };
            let trailing = member_len.checked_sub(1 + consumed).ok_or_else(|| {
                DecodeError::Malformed("object member array is too short".into())
            })?;
            self.skip_elements(trailing)?;
        }

        Ok(Object {
            module_uri,
            name,
            properties,
            entries,
            elements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::value::{DataSizeUnit, DurationUnit};

    // Test envelopes are built by hand with rmp, mirroring what the backend
    // sends.

    fn object_header(buf: &mut Vec<u8>, name: &str, module_uri: &str, members: u32) {
        rmp::encode::write_array_len(buf, 4).unwrap();
        rmp::encode::write_sint(buf, CODE_OBJECT).unwrap();
        rmp::encode::write_str(buf, name).unwrap();
        rmp::encode::write_str(buf, module_uri).unwrap();
        rmp::encode::write_array_len(buf, members).unwrap();
    }

    fn property(buf: &mut Vec<u8>, name: &str, write_value: impl FnOnce(&mut Vec<u8>)) {
        rmp::encode::write_array_len(buf, 3).unwrap();
        rmp::encode::write_sint(buf, CODE_MEMBER_PROPERTY).unwrap();
        rmp::encode::write_str(buf, name).unwrap();
        write_value(buf);
    }

    #[test]
    fn decodes_primitives() {
        let mut buf = Vec::new();
        rmp::encode::write_bool(&mut buf, true).unwrap();
        assert_eq!(decode_value(&buf).unwrap(), Value::Bool(true));

        let mut buf = Vec::new();
        rmp::encode::write_sint(&mut buf, -42).unwrap();
        assert_eq!(decode_value(&buf).unwrap(), Value::Int(-42));

        let mut buf = Vec::new();
        rmp::encode::write_str(&mut buf, "héllo").unwrap();
        assert_eq!(decode_value(&buf).unwrap(), Value::String("héllo".into()));

        let mut buf = Vec::new();
        rmp::encode::write_nil(&mut buf).unwrap();
        assert_eq!(decode_value(&buf).unwrap(), Value::Null);
    }

    #[test]
    fn decodes_duration_envelope() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_DURATION).unwrap();
        rmp::encode::write_f64(&mut buf, 5.0).unwrap();
        rmp::encode::write_str(&mut buf, "min").unwrap();

        let value = decode_value(&buf).unwrap();
        assert_eq!(
            value,
            Value::Duration(Duration::new(5.0, DurationUnit::Minutes))
        );
    }

    #[test]
    fn rejects_unknown_duration_unit() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_DURATION).unwrap();
        rmp::encode::write_f64(&mut buf, 1.0).unwrap();
        rmp::encode::write_str(&mut buf, "fortnight").unwrap();

        assert!(matches!(
            decode_value(&buf).unwrap_err(),
            DecodeError::UnknownDurationUnit(unit) if unit == "fortnight"
        ));
    }

    #[test]
    fn decodes_data_size_envelope() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_DATA_SIZE).unwrap();
        // int on the wire where a float is expected (Pkl Number)
        rmp::encode::write_sint(&mut buf, 30).unwrap();
        rmp::encode::write_str(&mut buf, "mib").unwrap();

        assert_eq!(
            decode_value(&buf).unwrap(),
            Value::DataSize(DataSize::new(30.0, DataSizeUnit::Mebibytes))
        );
    }

    #[test]
    fn decodes_listing_and_set() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_LISTING).unwrap();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        rmp::encode::write_sint(&mut buf, 1).unwrap();
        rmp::encode::write_sint(&mut buf, 2).unwrap();
        assert_eq!(
            decode_value(&buf).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );

        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_SET).unwrap();
        rmp::encode::write_array_len(&mut buf, 1).unwrap();
        rmp::encode::write_str(&mut buf, "only").unwrap();
        assert_eq!(
            decode_value(&buf).unwrap(),
            Value::Set(vec![Value::String("only".into())])
        );
    }

    #[test]
    fn decodes_object_with_all_member_kinds() {
        let mut buf = Vec::new();
        object_header(&mut buf, "pkl.base#Dynamic", "pkl:base", 3);
        property(&mut buf, "bar", |b| {
            rmp::encode::write_sint(b, 1).unwrap();
        });
        // entry ["k"] = false
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_MEMBER_ENTRY).unwrap();
        rmp::encode::write_str(&mut buf, "k").unwrap();
        rmp::encode::write_bool(&mut buf, false).unwrap();
        // element [0] = "elem"
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_MEMBER_ELEMENT).unwrap();
        rmp::encode::write_sint(&mut buf, 0).unwrap();
        rmp::encode::write_str(&mut buf, "elem").unwrap();

        let Value::Object(obj) = decode_value(&buf).unwrap() else {
            panic!("expected an object");
        };
        assert!(obj.is_dynamic());
        assert_eq!(obj.property("bar"), Some(&Value::Int(1)));
        assert_eq!(
            obj.entries,
            vec![(Value::String("k".into()), Value::Bool(false))]
        );
        assert_eq!(obj.elements, vec![Value::String("elem".into())]);
    }

    #[test]
    fn skips_envelope_fields_from_future_versions() {
        // a Duration envelope with two extra fields appended
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 5).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_DURATION).unwrap();
        rmp::encode::write_f64(&mut buf, 1.5).unwrap();
        rmp::encode::write_str(&mut buf, "h").unwrap();
        rmp::encode::write_str(&mut buf, "future field").unwrap();
        rmp::encode::write_array_len(&mut buf, 1).unwrap();
        rmp::encode::write_nil(&mut buf).unwrap();

        assert_eq!(
            decode_value(&buf).unwrap(),
            Value::Duration(Duration::new(1.5, DurationUnit::Hours))
        );
    }

    #[test]
    fn decodes_legacy_and_current_class_identity() {
        // pre-0.30: only the code
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 1).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_CLASS).unwrap();
        assert_eq!(
            decode_value(&buf).unwrap(),
            Value::Class(ClassInfo::default())
        );

        // 0.30+: qualified name and module URI
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_TYPE_ALIAS).unwrap();
        rmp::encode::write_str(&mut buf, "pkl.base#Int8").unwrap();
        rmp::encode::write_str(&mut buf, "pkl:base").unwrap();
        assert_eq!(
            decode_value(&buf).unwrap(),
            Value::TypeAlias(TypeAliasInfo {
                module_uri: "pkl:base".into(),
                name: "pkl.base#Int8".into(),
            })
        );
    }

    #[test]
    fn decodes_bytes_envelope() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_BYTES).unwrap();
        rmp::encode::write_bin(&mut buf, &[1, 2, 255]).unwrap();
        assert_eq!(decode_value(&buf).unwrap(), Value::Bytes(vec![1, 2, 255]));
    }

    #[test]
    fn function_values_are_rejected() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 1).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_FUNCTION).unwrap();
        assert!(matches!(
            decode_value(&buf).unwrap_err(),
            DecodeError::UnexpectedCode { code: CODE_FUNCTION, .. }
        ));
    }

    #[test]
    fn truncated_envelope_is_an_error() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        rmp::encode::write_sint(&mut buf, CODE_DURATION).unwrap();
        assert!(matches!(
            decode_value(&buf).unwrap_err(),
            DecodeError::Truncated | DecodeError::Malformed(_)
        ));
    }
}
