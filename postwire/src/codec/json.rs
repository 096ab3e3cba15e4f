use bytes::{BufMut, Bytes, BytesMut};
use std::{any::Any, fmt};

use super::{Codec, DecodeError, Decoded, EncodeError, Target};
use crate::{
    encode::Parameter,
    postgres::{Oid, PgFormat, oid},
};

/// `jsonb` binary format version.
const JSONB_VERSION: u8 = 1;

/// `json` or `jsonb` document, kept as text.
///
/// With `json` feature, use [`deserialize`][Json::deserialize] and
/// [`from_serialize`][Json::from_serialize] to convert with `serde` types.
#[derive(Clone, PartialEq, Eq)]
pub struct Json(String);

impl Json {
    /// Wrap a json text, the text is validated by the server.
    pub fn new(text: impl Into<String>) -> Json {
        Json(text.into())
    }

    /// Returns the json text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the inner json text.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Serialize `value` into json text.
    #[cfg(feature = "json")]
    pub fn from_serialize<T: serde::Serialize + ?Sized>(value: &T) -> Result<Json, EncodeError> {
        Ok(Json(serde_json::to_string(value)?))
    }

    /// Deserialize json text.
    #[cfg(feature = "json")]
    pub fn deserialize<'a, T: serde::Deserialize<'a>>(&'a self) -> Result<T, DecodeError> {
        Ok(serde_json::from_str(&self.0)?)
    }
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Json({})", self.0)
    }
}

/// Strip `jsonb` version header in binary format.
fn json_text(value: &Bytes, oid: Oid, format: PgFormat) -> Result<Bytes, DecodeError> {
    match (oid, format) {
        (oid::JSONB, PgFormat::Binary) => match value.first() {
            Some(&JSONB_VERSION) => Ok(value.slice(1..)),
            _ => Err(DecodeError::invalid("unsupported jsonb version")),
        },
        _ => Ok(value.clone()),
    }
}

fn jsonb(text: &[u8]) -> Parameter {
    let mut buf = BytesMut::with_capacity(1 + text.len());
    buf.put_u8(JSONB_VERSION);
    buf.put_slice(text);
    Parameter::binary(oid::JSONB, buf.freeze())
}

/// [`Codec`] for `json` and `jsonb` into [`Json`] or [`String`].
#[derive(Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
        matches!(oid, oid::JSON | oid::JSONB) && (target.accepts::<Json>() || target.is::<String>())
    }

    fn decode(&self, value: Bytes, oid: Oid, format: PgFormat, target: Target) -> Result<Decoded, DecodeError> {
        let text = String::from_utf8(json_text(&value, oid, format)?.into())?;
        match target.is::<String>() {
            true => Ok(Box::new(text)),
            false => Ok(Box::new(Json(text))),
        }
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<Json>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError> {
        match value.downcast_ref::<Json>() {
            Some(json) => Ok(jsonb(json.0.as_bytes())),
            None => Err(EncodeError::Unsupported { type_name: "Json" }),
        }
    }

    fn can_encode_null(&self, target: Target) -> bool {
        target.is::<Json>()
    }

    fn encode_null(&self, _: Target) -> Parameter {
        Parameter::null(oid::JSONB)
    }
}

/// [`Codec`] for `json` and `jsonb` into `serde_json::Value`.
#[cfg(feature = "json")]
#[derive(Debug, Default)]
pub struct JsonValueCodec;

#[cfg(feature = "json")]
impl Codec for JsonValueCodec {
    fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
        matches!(oid, oid::JSON | oid::JSONB) && target.is::<serde_json::Value>()
    }

    fn decode(&self, value: Bytes, oid: Oid, format: PgFormat, _: Target) -> Result<Decoded, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(&json_text(&value, oid, format)?)?;
        Ok(Box::new(value))
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<serde_json::Value>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError> {
        match value.downcast_ref::<serde_json::Value>() {
            Some(value) => Ok(jsonb(&serde_json::to_vec(value)?)),
            None => Err(EncodeError::Unsupported { type_name: "serde_json::Value" }),
        }
    }

    fn can_encode_null(&self, target: Target) -> bool {
        target.is::<serde_json::Value>()
    }

    fn encode_null(&self, _: Target) -> Parameter {
        Parameter::null(oid::JSONB)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn jsonb_binary() {
        let value = Bytes::from_static(b"\x01{\"a\":1}");
        let decoded = JsonCodec.decode(value, oid::JSONB, PgFormat::Binary, Target::ANY).unwrap();
        assert_eq!(decoded.downcast::<Json>().unwrap().as_str(), "{\"a\":1}");
    }

    #[test]
    fn jsonb_unknown_version() {
        let value = Bytes::from_static(b"\x02{}");
        assert!(JsonCodec.decode(value, oid::JSONB, PgFormat::Binary, Target::ANY).is_err());
    }

    #[test]
    fn json_into_string() {
        let codec = JsonCodec;
        assert!(codec.can_decode(oid::JSON, PgFormat::Text, Target::of::<String>()));
        let decoded = codec
            .decode(Bytes::from_static(b"[1,2]"), oid::JSON, PgFormat::Text, Target::of::<String>())
            .unwrap();
        assert_eq!(*decoded.downcast::<String>().unwrap(), "[1,2]");
    }

    #[test]
    fn encode_as_jsonb() {
        let param = JsonCodec.encode(&Json::new("{}")).unwrap();
        assert_eq!(param.oid(), oid::JSONB);
        assert_eq!(param.value().map(|v| &v[..]), Some(&b"\x01{}"[..]));
    }

    #[cfg(feature = "json")]
    #[test]
    fn serde_value() {
        let decoded = JsonValueCodec
            .decode(Bytes::from_static(b"{\"id\":7}"), oid::JSON, PgFormat::Text, Target::of::<serde_json::Value>())
            .unwrap();
        let value = decoded.downcast::<serde_json::Value>().unwrap();
        assert_eq!(value["id"], 7);
    }
}
