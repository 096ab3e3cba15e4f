use bytes::Bytes;
use std::{any::Any, fmt};

use super::{Codec, DecodeError, Decoded, EncodeError, Target};
use crate::{
    encode::Parameter,
    postgres::{Oid, PgFormat, oid},
};

/// Label of a user defined enum type.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PgEnum(pub String);

impl fmt::Display for PgEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PgEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PgEnum({:?})", self.0)
    }
}

/// [`Codec`] for user defined enum types.
///
/// Enum oids are assigned when the type is created, so the codec is
/// registered per connection, usually from a [`CodecRegistrar`][super::CodecRegistrar]
/// that looks up the oid in `pg_type`.
///
/// Labels decode into [`PgEnum`] or [`String`]. [`PgEnum`] parameters are
/// sent in text format with unspecified oid, the server infers the enum type
/// from the statement.
#[derive(Debug, Clone)]
pub struct EnumCodec {
    oids: Vec<Oid>,
}

impl EnumCodec {
    /// Create codec for enum type of `oid`.
    pub fn new(oid: Oid) -> Self {
        Self { oids: vec![oid] }
    }

    /// Also decode enum type of `oid`.
    pub fn with_oid(mut self, oid: Oid) -> Self {
        self.oids.push(oid);
        self
    }
}

impl Codec for EnumCodec {
    fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
        self.oids.contains(&oid) && (target.accepts::<PgEnum>() || target.is::<String>())
    }

    // enum label is the same in both format
    fn decode(&self, value: Bytes, _: Oid, _: PgFormat, target: Target) -> Result<Decoded, DecodeError> {
        let label = String::from_utf8(value.into())?;
        match target.is::<String>() {
            true => Ok(Box::new(label)),
            false => Ok(Box::new(PgEnum(label))),
        }
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<PgEnum>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError> {
        match value.downcast_ref::<PgEnum>() {
            Some(label) => Ok(Parameter::text(oid::UNSPECIFIED, Bytes::copy_from_slice(label.0.as_bytes()))),
            None => Err(EncodeError::Unsupported { type_name: "PgEnum" }),
        }
    }

    fn can_encode_null(&self, target: Target) -> bool {
        target.is::<PgEnum>()
    }
}
