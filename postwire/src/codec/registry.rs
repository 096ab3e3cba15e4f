use bytes::Bytes;
use std::{
    any::{Any, type_name},
    fmt,
    sync::Arc,
};

use super::{
    ArrayCodec, ByteaCodec, Codec, DecodeError, Decoded, EncodeError, JsonCodec, Numeric, Point,
    RangeCodec, ScalarCodec, Target,
};
use crate::{
    encode::{Argument, Parameter},
    postgres::{Oid, PgFormat, oid},
};

/// What to do with a column no codec accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownTypePolicy {
    /// Returns raw [`Bytes`], or [`String`] for text format, when those are requested.
    #[default]
    PassThrough,
    /// Always fail with [`DecodeError::UnsupportedType`].
    Reject,
}

/// Ordered list of [`Codec`], first match wins.
///
/// Cloning is cheap, codecs are shared.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn Codec>>,
    unknown: UnknownTypePolicy,
}

impl CodecRegistry {
    /// Create registry with all builtin codecs.
    pub fn new() -> Self {
        let mut me = Self::empty();

        me.add_last(ScalarCodec::<bool>::new())
            .add_last(ScalarCodec::<i8>::new())
            .add_last(ScalarCodec::<i16>::new())
            .add_last(ScalarCodec::<i32>::new())
            .add_last(ScalarCodec::<i64>::new())
            .add_last(ScalarCodec::<u32>::new())
            .add_last(ScalarCodec::<f32>::new())
            .add_last(ScalarCodec::<f64>::new())
            .add_last(ScalarCodec::<String>::new())
            .add_last(ScalarCodec::<Numeric>::new())
            .add_last(ScalarCodec::<Point>::new())
            .add_last(ByteaCodec);

        #[cfg(feature = "json")]
        me.add_last(super::JsonValueCodec);
        me.add_last(JsonCodec);

        #[cfg(feature = "time")]
        me.add_last(ScalarCodec::<time::Date>::new())
            .add_last(ScalarCodec::<time::Time>::new())
            .add_last(ScalarCodec::<time::PrimitiveDateTime>::new())
            .add_last(ScalarCodec::<time::UtcDateTime>::new());

        me.add_last(ArrayCodec::<bool>::new())
            .add_last(ArrayCodec::<i16>::new())
            .add_last(ArrayCodec::<i32>::new())
            .add_last(ArrayCodec::<i64>::new())
            .add_last(ArrayCodec::<u32>::new())
            .add_last(ArrayCodec::<f32>::new())
            .add_last(ArrayCodec::<f64>::new())
            .add_last(ArrayCodec::<String>::new())
            .add_last(ArrayCodec::<Numeric>::new())
            .add_last(ArrayCodec::<Point>::new());

        #[cfg(feature = "time")]
        me.add_last(ArrayCodec::<time::Date>::new())
            .add_last(ArrayCodec::<time::Time>::new())
            .add_last(ArrayCodec::<time::PrimitiveDateTime>::new())
            .add_last(ArrayCodec::<time::UtcDateTime>::new());

        me.add_last(RangeCodec::<i32>::new())
            .add_last(RangeCodec::<i64>::new())
            .add_last(RangeCodec::<Numeric>::new());

        #[cfg(feature = "time")]
        me.add_last(RangeCodec::<time::Date>::new())
            .add_last(RangeCodec::<time::PrimitiveDateTime>::new())
            .add_last(RangeCodec::<time::UtcDateTime>::new());

        me
    }

    /// Create registry without any codec.
    pub fn empty() -> Self {
        Self { codecs: vec![], unknown: UnknownTypePolicy::default() }
    }

    /// Set the [`UnknownTypePolicy`].
    pub fn set_unknown_types(&mut self, policy: UnknownTypePolicy) -> &mut Self {
        self.unknown = policy;
        self
    }

    pub fn unknown_types(&self) -> UnknownTypePolicy {
        self.unknown
    }

    /// Register codec with the highest priority.
    pub fn add_first(&mut self, codec: impl Codec) -> &mut Self {
        self.codecs.insert(0, Arc::new(codec));
        self
    }

    /// Register codec with the lowest priority.
    pub fn add_last(&mut self, codec: impl Codec) -> &mut Self {
        self.codecs.push(Arc::new(codec));
        self
    }

    /// Returns the number of registered codecs.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Find the codec which decodes `oid` in `format` into `target`.
    pub fn decoder(&self, oid: Oid, format: PgFormat, target: Target) -> Option<&dyn Codec> {
        self.codecs
            .iter()
            .find(|c| c.can_decode(oid, format, target))
            .map(|c| &**c)
    }

    /// Find the codec which encodes `value`.
    pub fn encoder(&self, value: &dyn Any) -> Option<&dyn Codec> {
        self.codecs.iter().find(|c| c.can_encode(value)).map(|c| &**c)
    }

    /// Decode a column value, NULL decodes into `None` without asking any codec.
    pub fn decode(
        &self,
        value: Option<Bytes>,
        oid: Oid,
        format: PgFormat,
        target: Target,
    ) -> Result<Option<Decoded>, DecodeError> {
        let Some(value) = value else {
            return Ok(None);
        };
        if let Some(codec) = self.decoder(oid, format, target) {
            return codec.decode(value, oid, format, target).map(Some);
        }
        self.pass_through(value, oid, format, target).map(Some)
    }

    /// Decode a column value into `T`.
    pub fn decode_as<T: Any>(&self, value: Option<Bytes>, oid: Oid, format: PgFormat) -> Result<Option<T>, DecodeError> {
        match self.decode(value, oid, format, Target::of::<T>())? {
            Some(decoded) => match decoded.downcast::<T>() {
                Ok(value) => Ok(Some(*value)),
                Err(_) => Err(DecodeError::TypeMismatch { oid, target: type_name::<T>() }),
            },
            None => Ok(None),
        }
    }

    fn pass_through(&self, value: Bytes, oid: Oid, format: PgFormat, target: Target) -> Result<Decoded, DecodeError> {
        let unsupported = DecodeError::UnsupportedType { oid, format };
        if self.unknown == UnknownTypePolicy::Reject {
            return Err(unsupported);
        }
        if target.accepts::<Bytes>() {
            return Ok(Box::new(value));
        }
        if target.is::<String>() && format == PgFormat::Text {
            return Ok(Box::new(String::from_utf8(value.into())?));
        }
        Err(unsupported)
    }

    /// Encode a query argument.
    pub fn encode_argument(&self, argument: &Argument) -> Result<Parameter, EncodeError> {
        match argument {
            Argument::Value { value, type_name: name } => {
                let value: &dyn Any = &**value;
                match self.encoder(value) {
                    Some(codec) => codec.encode(value),
                    None => Err(EncodeError::Unsupported { type_name: *name }),
                }
            }
            Argument::Null(target) => Ok(self.encode_null(*target)),
            Argument::Encoded(param) => Ok(param.clone()),
        }
    }

    /// Encode NULL of `target` type, unspecified oid when no codec claims the type.
    pub fn encode_null(&self, target: Target) -> Parameter {
        self.codecs
            .iter()
            .find(|c| c.can_encode_null(target))
            .map(|c| c.encode_null(target))
            .unwrap_or_else(|| Parameter::null(oid::UNSPECIFIED))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codecs.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("unknown", &self.unknown)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        codec::{Json, PgRange},
        encode::Encode,
    };
    use std::{
        fmt::Debug,
        ops::Bound,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Decodes `int4` as its text representation, counting invocations.
    struct Int4AsText(Arc<AtomicUsize>);

    impl Codec for Int4AsText {
        fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
            oid == oid::INT4 && target.accepts::<String>()
        }

        fn decode(&self, value: Bytes, _: Oid, _: PgFormat, _: Target) -> Result<Decoded, DecodeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let n = i32::from_be_bytes(super::super::fixed(&value)?);
            Ok(Box::new(n.to_string()))
        }

        fn can_encode(&self, _: &dyn Any) -> bool {
            false
        }

        fn encode(&self, _: &dyn Any) -> Result<Parameter, EncodeError> {
            Err(EncodeError::invalid("decode only"))
        }
    }

    fn int4(n: i32) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(&n.to_be_bytes()))
    }

    #[test]
    fn builtin_lookup() {
        let registry = CodecRegistry::new();
        assert_eq!(registry.decode_as::<i32>(int4(42), oid::INT4, PgFormat::Binary).unwrap(), Some(42));
        assert_eq!(registry.decode_as::<i32>(None, oid::INT4, PgFormat::Binary).unwrap(), None);
        assert!(matches!(
            registry.decode_as::<bool>(int4(1), oid::INT4, PgFormat::Binary),
            Err(DecodeError::UnsupportedType { .. }),
        ));
    }

    #[test]
    fn add_first_overrides_builtin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CodecRegistry::new();
        registry.add_first(Int4AsText(calls.clone()));

        let decoded = registry.decode(int4(7), oid::INT4, PgFormat::Binary, Target::ANY).unwrap().unwrap();
        assert_eq!(*decoded.downcast::<String>().unwrap(), "7");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // predicate rejects `i32`, builtin still serves it
        assert_eq!(registry.decode_as::<i32>(int4(7), oid::INT4, PgFormat::Binary).unwrap(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_last_fills_gap_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CodecRegistry::new();
        registry.add_last(Int4AsText(calls.clone()));

        let decoded = registry.decode(int4(7), oid::INT4, PgFormat::Binary, Target::ANY).unwrap().unwrap();
        assert_eq!(*decoded.downcast::<i32>().unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_type_policy() {
        let mut registry = CodecRegistry::new();
        let raw = Some(Bytes::from_static(b"(1,2)"));

        let bytes = registry.decode_as::<Bytes>(raw.clone(), oid::RECORD, PgFormat::Binary).unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"(1,2)"[..]));
        let text = registry.decode_as::<String>(raw.clone(), oid::RECORD, PgFormat::Text).unwrap();
        assert_eq!(text.as_deref(), Some("(1,2)"));
        assert!(registry.decode_as::<String>(raw.clone(), oid::RECORD, PgFormat::Binary).is_err());

        registry.set_unknown_types(UnknownTypePolicy::Reject);
        assert!(matches!(
            registry.decode_as::<Bytes>(raw, oid::RECORD, PgFormat::Binary),
            Err(DecodeError::UnsupportedType { oid: oid::RECORD, .. }),
        ));
    }

    #[test]
    fn null_for_every_codec() {
        let registry = CodecRegistry::new();
        for oid in [oid::BOOL, oid::INT8, oid::TEXT, oid::NUMERIC, oid::JSONB, oid::INT4_ARRAY, oid::INT4RANGE] {
            let decoded = registry.decode(None, oid, PgFormat::Binary, Target::ANY).unwrap();
            assert!(decoded.is_none());
        }
    }

    #[test]
    fn encode_arguments() {
        let registry = CodecRegistry::new();
        let param = registry.encode_argument(&"hello".into_argument()).unwrap();
        assert_eq!(param.oid(), oid::TEXT);

        let param = registry.encode_argument(&None::<i64>.into_argument()).unwrap();
        assert_eq!((param.oid(), param.is_null()), (oid::INT8, true));

        let empty = CodecRegistry::empty();
        assert!(matches!(
            empty.encode_argument(&1i32.into_argument()),
            Err(EncodeError::Unsupported { .. }),
        ));
        assert_eq!(empty.encode_argument(&None::<i32>.into_argument()).unwrap().oid(), oid::UNSPECIFIED);
    }

    fn round_trip<T: Encode + Any>(registry: &CodecRegistry, value: T) -> T {
        let param = registry.encode_argument(&value.into_argument()).unwrap();
        registry
            .decode_as::<T>(param.value().cloned(), param.oid(), param.format())
            .unwrap()
            .unwrap()
    }

    fn assert_round_trip<T: Encode + Any + Clone + PartialEq + Debug>(registry: &CodecRegistry, values: &[T]) {
        for value in values {
            assert_eq!(round_trip(registry, value.clone()), *value);
        }
    }

    fn from_text<T: Any>(registry: &CodecRegistry, oid: Oid, text: &str) -> T {
        let value = Bytes::copy_from_slice(text.as_bytes());
        registry.decode_as::<T>(Some(value), oid, PgFormat::Text).unwrap().unwrap()
    }

    #[test]
    fn builtin_binary_round_trip() {
        let registry = CodecRegistry::new();

        assert_round_trip(&registry, &[true, false]);
        assert_round_trip(&registry, &[i8::MIN, 0, i8::MAX]);
        assert_round_trip(&registry, &[i16::MIN, -1, 0, i16::MAX]);
        assert_round_trip(&registry, &[i32::MIN, 0, i32::MAX]);
        assert_round_trip(&registry, &[i64::MIN, 0, i64::MAX]);
        assert_round_trip(&registry, &[0u32, u32::MAX]);
        assert_round_trip(&registry, &[f32::MIN, f32::MIN_POSITIVE, f32::MAX, f32::INFINITY, f32::NEG_INFINITY]);
        assert_round_trip(&registry, &[f64::MIN, f64::EPSILON, f64::MAX, f64::INFINITY, f64::NEG_INFINITY]);
        assert!(round_trip(&registry, f32::NAN).is_nan());
        assert!(round_trip(&registry, f64::NAN).is_nan());

        assert_round_trip(&registry, &[String::new(), String::from("héllo wörld")]);
        assert_round_trip(&registry, &[Vec::<u8>::new(), vec![0, 0xff]]);
        assert_round_trip(&registry, &[Bytes::new(), Bytes::from_static(b"\x00\x01")]);
        assert_round_trip(&registry, &[Point::new(f64::MIN, f64::MAX), Point::new(f64::INFINITY, -0.5)]);
        assert_round_trip(&registry, &[Json::new("null"), Json::new(r#"{"a":[1,null]}"#)]);

        let numerics = ["0", "-0.0001", "99999999999999999999.000", "NaN", "Infinity", "-Infinity"]
            .map(|n| n.parse::<Numeric>().unwrap());
        assert_round_trip(&registry, &numerics);

        assert_round_trip(&registry, &[vec![i32::MIN, i32::MAX], vec![]]);
        assert_round_trip(&registry, &[vec![Some(String::new()), None]]);
        assert_round_trip(&registry, &[vec![Point::default()]]);

        assert_round_trip(&registry, &[
            PgRange::new(Bound::Included(i32::MIN), Bound::Excluded(i32::MAX)),
            PgRange::new(Bound::Unbounded, Bound::Included(0)),
            PgRange::empty(),
        ]);
        assert_round_trip(&registry, &[PgRange::new(Bound::Excluded(i64::MIN), Bound::Unbounded)]);
    }

    #[cfg(feature = "time")]
    #[test]
    fn datetime_binary_round_trip() {
        use time::{UtcDateTime, macros::{date, datetime, time}};

        let registry = CodecRegistry::new();
        assert_round_trip(&registry, &[date!(0001-01-01), date!(2000-01-01), date!(9999-12-31)]);
        assert_round_trip(&registry, &[time!(0:00), time!(23:59:59.999999)]);
        assert_round_trip(&registry, &[datetime!(1999-12-31 23:59:59.999999), datetime!(9999-12-31 23:59:59.999999)]);
        assert_round_trip(&registry, &[UtcDateTime::from(datetime!(1970-01-01 0:00 UTC))]);
        assert_round_trip(&registry, &[PgRange::new(Bound::Included(date!(2024-01-01)), Bound::Unbounded)]);
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_value_round_trip() {
        let registry = CodecRegistry::new();
        assert_round_trip(&registry, &[serde_json::json!({"a": [1, null, "x"]}), serde_json::Value::Null]);
    }

    #[test]
    fn builtin_text_boundaries() {
        let registry = CodecRegistry::new();

        assert_eq!(from_text::<i16>(&registry, oid::INT2, "-32768"), i16::MIN);
        assert_eq!(from_text::<i32>(&registry, oid::INT4, "2147483647"), i32::MAX);
        assert_eq!(from_text::<i64>(&registry, oid::INT8, "-9223372036854775808"), i64::MIN);
        assert_eq!(from_text::<u32>(&registry, oid::OID, "4294967295"), u32::MAX);
        assert_eq!(from_text::<f64>(&registry, oid::FLOAT8, "1.7976931348623157e+308"), f64::MAX);
        assert_eq!(from_text::<f32>(&registry, oid::FLOAT4, "-Infinity"), f32::NEG_INFINITY);
        assert!(from_text::<f64>(&registry, oid::FLOAT8, "NaN").is_nan());
        assert!(!from_text::<bool>(&registry, oid::BOOL, "f"));

        assert_eq!(from_text::<String>(&registry, oid::TEXT, ""), "");
        assert_eq!(from_text::<Vec<u8>>(&registry, oid::BYTEA, "\\x"), Vec::<u8>::new());
        assert_eq!(from_text::<Point>(&registry, oid::POINT, "(-1.5,2)"), Point::new(-1.5, 2.0));
        assert_eq!(from_text::<Numeric>(&registry, oid::NUMERIC, "-0.0001").as_str(), "-0.0001");
        assert_eq!(
            from_text::<Vec<Option<i32>>>(&registry, oid::INT4_ARRAY, "{-2147483648,NULL}"),
            [Some(i32::MIN), None],
        );
        assert_eq!(
            from_text::<PgRange<i64>>(&registry, oid::INT8RANGE, "[1,9223372036854775807)"),
            PgRange::new(Bound::Included(1), Bound::Excluded(i64::MAX)),
        );
    }
}
