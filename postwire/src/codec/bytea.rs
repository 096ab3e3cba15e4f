use bytes::Bytes;
use std::any::Any;

use super::{Codec, DecodeError, Decoded, EncodeError, Target};
use crate::{
    encode::Parameter,
    postgres::{Oid, PgFormat, oid},
};

/// [`Codec`] for `bytea`, decodes into [`Vec<u8>`] by default or [`Bytes`] without copying.
#[derive(Debug, Default)]
pub struct ByteaCodec;

impl Codec for ByteaCodec {
    fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
        oid == oid::BYTEA && (target.accepts::<Vec<u8>>() || target.is::<Bytes>())
    }

    fn decode(&self, value: Bytes, _: Oid, format: PgFormat, target: Target) -> Result<Decoded, DecodeError> {
        let bytes = match format {
            PgFormat::Binary => value,
            PgFormat::Text => Bytes::from(unescape(&value)?),
        };
        match target.is::<Bytes>() {
            true => Ok(Box::new(bytes)),
            false => Ok(Box::new(Vec::from(bytes))),
        }
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<Vec<u8>>() || value.is::<Bytes>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError> {
        if let Some(bytes) = value.downcast_ref::<Bytes>() {
            return Ok(Parameter::binary(oid::BYTEA, bytes.clone()));
        }
        match value.downcast_ref::<Vec<u8>>() {
            Some(vec) => Ok(Parameter::binary(oid::BYTEA, Bytes::copy_from_slice(vec))),
            None => Err(EncodeError::Unsupported { type_name: "bytea" }),
        }
    }

    fn can_encode_null(&self, target: Target) -> bool {
        target.is::<Vec<u8>>() || target.is::<Bytes>()
    }

    fn encode_null(&self, _: Target) -> Parameter {
        Parameter::null(oid::BYTEA)
    }
}

/// Decode `bytea` text output, either hex (`\x0a0b`) or the legacy escape format.
fn unescape(text: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if let Some(hex) = text.strip_prefix(b"\\x") {
        if hex.len() % 2 != 0 {
            return Err(DecodeError::invalid("odd length bytea hex"));
        }
        return hex
            .chunks_exact(2)
            .map(|pair| Ok(nibble(pair[0])? << 4 | nibble(pair[1])?))
            .collect();
    }

    let mut out = Vec::with_capacity(text.len());
    let mut iter = text.iter().copied();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(d0 @ b'0'..=b'3') => {
                let (Some(d1 @ b'0'..=b'7'), Some(d2 @ b'0'..=b'7')) = (iter.next(), iter.next()) else {
                    return Err(DecodeError::invalid("invalid bytea escape"));
                };
                out.push((d0 - b'0') << 6 | (d1 - b'0') << 3 | (d2 - b'0'));
            }
            _ => return Err(DecodeError::invalid("invalid bytea escape")),
        }
    }
    Ok(out)
}

fn nibble(b: u8) -> Result<u8, DecodeError> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(DecodeError::invalid("invalid bytea hex digit")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_format() {
        assert_eq!(unescape(b"\\xdeadBEEF").unwrap(), [0xde, 0xad, 0xbe, 0xef]);
        assert!(unescape(b"\\xabc").is_err());
    }

    #[test]
    fn escape_format() {
        assert_eq!(unescape(b"a\\\\b\\001").unwrap(), b"a\\b\x01");
        assert!(unescape(b"\\9").is_err());
    }

    #[test]
    fn zero_copy_target() {
        let value = Bytes::from_static(b"\x01\x02");
        let decoded = ByteaCodec
            .decode(value.clone(), oid::BYTEA, PgFormat::Binary, Target::of::<Bytes>())
            .unwrap();
        assert_eq!(*decoded.downcast::<Bytes>().unwrap(), value);
    }
}
