//! Type codec registry.
//!
//! Every column value and query parameter pass through a [`CodecRegistry`].
//! The registry is an ordered list of [`Codec`], and the first codec whose
//! predicate accept the value is used. Registering a codec with
//! [`add_first`][CodecRegistry::add_first] therefore override the builtin
//! codec of the same type, while [`add_last`][CodecRegistry::add_last] only
//! fill the gap for types no other codec accept.
//!
//! Custom registration for a connection is done with [`CodecRegistrar`],
//! which run right after startup and may query the server, for example to
//! look up the oid of an enum type.
//!
//! # Builtin codecs
//!
//! | postgres | rust |
//! |---|---|
//! | `bool` | [`bool`] |
//! | `int2`, `int4`, `int8` | [`i16`], [`i32`], [`i64`] |
//! | `oid` | [`u32`] |
//! | `float4`, `float8` | [`f32`], [`f64`] |
//! | `numeric` | [`Numeric`] |
//! | `text`, `varchar`, `bpchar`, `name`, `unknown` | [`String`] |
//! | `bytea` | [`Vec<u8>`], [`Bytes`] |
//! | `json`, `jsonb` | [`Json`], [`String`], `serde_json::Value` |
//! | `point` | [`Point`] |
//! | one dimensional arrays | [`Vec<T>`], [`Vec<Option<T>>`] |
//! | `int4range`, `int8range`, `numrange`, and time ranges | [`PgRange<T>`] |
//! | `date`, `time`, `timestamp`, `timestamptz` | `time` crate types |
//!
//! Enum types require registering an [`EnumCodec`] with the type oid.
use bytes::Bytes;
use std::any::{Any, TypeId, type_name};

use crate::{
    encode::Parameter,
    postgres::{Oid, PgFormat, oid},
};

mod error;
mod registry;
mod registrar;

mod scalar;
mod bytea;
mod numeric;
mod json;
mod geometric;
mod array;
mod range;
mod enums;
#[cfg(feature = "time")]
mod datetime;

pub use error::{DecodeError, EncodeError};
pub use registry::{CodecRegistry, UnknownTypePolicy};
pub use registrar::{BoxFuture, CodecRegistrar, EnumRegistrar, FnRegistrar, registrar_fn};

pub use scalar::{Scalar, ScalarCodec};
pub use bytea::ByteaCodec;
pub use numeric::Numeric;
pub use json::{Json, JsonCodec};
#[cfg(feature = "json")]
pub use json::JsonValueCodec;
pub use geometric::Point;
pub use array::ArrayCodec;
pub use range::{PgRange, RangeCodec, RangeElement};
pub use enums::{EnumCodec, PgEnum};

/// A decoded value, downcast it to the requested type.
pub type Decoded = Box<dyn Any + Send>;

/// Translate between postgres wire representation and rust values.
///
/// A codec declare what it accept through predicates, and the registry
/// invoke [`decode`][Codec::decode] or [`encode`][Codec::encode] only on the
/// first codec whose predicate returns `true`. NULL values never reach a codec.
pub trait Codec: Send + Sync + 'static {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// Returns `true` if this codec can decode value of `oid` in `format` into `target`.
    fn can_decode(&self, oid: Oid, format: PgFormat, target: Target) -> bool;

    /// Decode a non-NULL value.
    ///
    /// The returned value must be of the type named by `target`, unless
    /// `target` is [`Target::ANY`].
    fn decode(&self, value: Bytes, oid: Oid, format: PgFormat, target: Target) -> Result<Decoded, DecodeError>;

    /// Returns `true` if this codec can encode `value`.
    fn can_encode(&self, value: &dyn Any) -> bool;

    /// Encode `value` into a parameter.
    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError>;

    /// Returns `true` if this codec can encode NULL of `target` type.
    fn can_encode_null(&self, target: Target) -> bool {
        let _ = target;
        false
    }

    /// Encode NULL of `target` type, only called when [`can_encode_null`][Codec::can_encode_null]
    /// returns `true`.
    fn encode_null(&self, target: Target) -> Parameter {
        let _ = target;
        Parameter::null(oid::UNSPECIFIED)
    }
}

/// The rust type requested by the caller.
///
/// [`Target::ANY`] let the codec pick its default representation.
#[derive(Clone, Copy)]
pub struct Target {
    id: Option<TypeId>,
    name: &'static str,
}

impl Target {
    /// No specific type requested.
    pub const ANY: Target = Target { id: None, name: "any" };

    /// Target of type `T`.
    pub fn of<T: Any>() -> Target {
        Target { id: Some(TypeId::of::<T>()), name: type_name::<T>() }
    }

    /// Returns `true` if no specific type requested.
    pub fn is_any(&self) -> bool {
        self.id.is_none()
    }

    /// Returns `true` if `T` is requested.
    pub fn is<T: Any>(&self) -> bool {
        self.id == Some(TypeId::of::<T>())
    }

    /// Returns `true` if `T` is requested or no specific type requested.
    pub fn accepts<T: Any>(&self) -> bool {
        self.id.is_none() || self.is::<T>()
    }

    /// Type name of the target.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// View value bytes as utf8 text.
pub(crate) fn text(value: &[u8]) -> Result<&str, DecodeError> {
    Ok(std::str::from_utf8(value)?)
}

/// View value bytes as fixed size array.
pub(crate) fn fixed<const N: usize>(value: &[u8]) -> Result<[u8; N], DecodeError> {
    value.try_into().map_err(|_| DecodeError::invalid_len(N, value.len()))
}

/// Split `n` bytes from the front of `value`.
pub(crate) fn take<'a>(value: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if value.len() < n {
        return Err(DecodeError::invalid("value truncated"));
    }
    let (head, rest) = value.split_at(n);
    *value = rest;
    Ok(head)
}

/// Read big endian `i32` from the front of `value`.
pub(crate) fn take_i32(value: &mut &[u8]) -> Result<i32, DecodeError> {
    Ok(i32::from_be_bytes(fixed(take(value, 4)?)?))
}

/// Read length prefixed element, `None` for NULL.
pub(crate) fn take_element<'a>(value: &mut &'a [u8]) -> Result<Option<&'a [u8]>, DecodeError> {
    match take_i32(value)? {
        -1 => Ok(None),
        len @ 0.. => take(value, len as usize).map(Some),
        len => Err(DecodeError::invalid(format!("negative element length {len}"))),
    }
}

/// Write length prefixed element.
pub(crate) fn put_element(buf: &mut bytes::BytesMut, f: impl FnOnce(&mut bytes::BytesMut) -> Result<(), EncodeError>) -> Result<(), EncodeError> {
    use bytes::BufMut;

    let offset = buf.len();
    buf.put_i32(0);
    f(buf)?;
    let Ok(len) = i32::try_from(buf.len() - offset - 4) else {
        return Err(EncodeError::invalid("element too large"));
    };
    buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}
