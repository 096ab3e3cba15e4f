use bytes::{BufMut, Bytes, BytesMut};
use std::{
    any::{Any, type_name},
    marker::PhantomData,
};

use super::{Codec, DecodeError, Decoded, EncodeError, Target, fixed};
use crate::{
    encode::Parameter,
    postgres::{Oid, PgFormat, oid},
};

/// A type with single value wire representation.
///
/// Implementing [`Scalar`] gives the type a [`ScalarCodec`], and make it
/// usable as element of [`ArrayCodec`][super::ArrayCodec].
pub trait Scalar: Any + Send + Sync + Sized {
    /// Type oids this type decodes from, the first one is used when encoding.
    const OIDS: &'static [Oid];

    /// Oids of one dimensional array of this type, the first one is used when encoding.
    const ARRAY_OIDS: &'static [Oid];

    /// Parse text format.
    fn from_text(text: &str) -> Result<Self, DecodeError>;

    /// Parse binary format.
    fn from_binary(value: &[u8]) -> Result<Self, DecodeError>;

    /// Write binary format.
    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError>;
}

/// Oid used when encoding `T`.
pub(crate) fn encode_oid<T: Scalar>() -> Oid {
    T::OIDS.first().copied().unwrap_or(oid::UNSPECIFIED)
}

/// Decode scalar in either format.
pub(crate) fn decode_scalar<T: Scalar>(value: &[u8], format: PgFormat) -> Result<T, DecodeError> {
    match format {
        PgFormat::Text => T::from_text(super::text(value)?),
        PgFormat::Binary => T::from_binary(value),
    }
}

/// [`Codec`] for any [`Scalar`] type.
pub struct ScalarCodec<T>(PhantomData<fn() -> T>);

impl<T> ScalarCodec<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ScalarCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Codec for ScalarCodec<T> {
    fn name(&self) -> &'static str {
        type_name::<T>()
    }

    fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
        T::OIDS.contains(&oid) && target.accepts::<T>()
    }

    fn decode(&self, value: Bytes, _: Oid, format: PgFormat, _: Target) -> Result<Decoded, DecodeError> {
        Ok(Box::new(decode_scalar::<T>(&value, format)?))
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<T>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError> {
        let Some(value) = value.downcast_ref::<T>() else {
            return Err(EncodeError::Unsupported { type_name: type_name::<T>() });
        };
        let mut buf = BytesMut::new();
        value.to_binary(&mut buf)?;
        Ok(Parameter::binary(encode_oid::<T>(), buf.freeze()))
    }

    fn can_encode_null(&self, target: Target) -> bool {
        target.is::<T>()
    }

    fn encode_null(&self, _: Target) -> Parameter {
        Parameter::null(encode_oid::<T>())
    }
}

macro_rules! number {
    ($($ty:ty => $oid:expr, $array:expr;)*) => {$(
        impl Scalar for $ty {
            const OIDS: &'static [Oid] = &[$oid];
            const ARRAY_OIDS: &'static [Oid] = &[$array];

            fn from_text(text: &str) -> Result<Self, DecodeError> {
                text.trim().parse().map_err(|e| {
                    DecodeError::invalid(format!("invalid {} {text:?}: {e}", stringify!($ty)))
                })
            }

            fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
                Ok(<$ty>::from_be_bytes(fixed(value)?))
            }

            fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
                buf.put_slice(&self.to_be_bytes());
                Ok(())
            }
        }
    )*};
}

number! {
    i16 => oid::INT2, oid::INT2_ARRAY;
    i32 => oid::INT4, oid::INT4_ARRAY;
    i64 => oid::INT8, oid::INT8_ARRAY;
    u32 => oid::OID, oid::OID_ARRAY;
    f32 => oid::FLOAT4, oid::FLOAT4_ARRAY;
    f64 => oid::FLOAT8, oid::FLOAT8_ARRAY;
}

impl Scalar for bool {
    const OIDS: &'static [Oid] = &[oid::BOOL];
    const ARRAY_OIDS: &'static [Oid] = &[oid::BOOL_ARRAY];

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        match text {
            "t" | "true" => Ok(true),
            "f" | "false" => Ok(false),
            _ => Err(DecodeError::invalid(format!("invalid bool {text:?}"))),
        }
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        let [b] = fixed(value)?;
        Ok(b != 0)
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(*self as u8);
        Ok(())
    }
}

/// Postgres `"char"`, a single byte.
impl Scalar for i8 {
    const OIDS: &'static [Oid] = &[oid::CHAR];
    const ARRAY_OIDS: &'static [Oid] = &[oid::CHAR_ARRAY];

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        match text.as_bytes() {
            [] => Ok(0),
            &[b] => Ok(b as i8),
            _ => Err(DecodeError::invalid(format!("invalid \"char\" {text:?}"))),
        }
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        let [b] = fixed(value)?;
        Ok(b as i8)
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_i8(*self);
        Ok(())
    }
}

impl Scalar for String {
    const OIDS: &'static [Oid] = &[oid::TEXT, oid::VARCHAR, oid::BPCHAR, oid::NAME, oid::UNKNOWN];
    const ARRAY_OIDS: &'static [Oid] = &[oid::TEXT_ARRAY, oid::VARCHAR_ARRAY, oid::BPCHAR_ARRAY, oid::NAME_ARRAY];

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        Ok(text.to_owned())
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        Ok(String::from_utf8(value.to_vec())?)
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_slice(self.as_bytes());
        Ok(())
    }
}
