//! Query parameter encoding.
//!
//! Values are converted into [`Argument`] with [`Encode`], and the
//! connection's [`CodecRegistry`][crate::codec::CodecRegistry] turns them into
//! [`Parameter`] right before the `Bind` message is written.
use bytes::{Buf, Bytes};
use std::{any::{Any, type_name}, fmt};

use crate::{
    codec::{Json, PgEnum, PgRange, RangeElement, Scalar, Target},
    ext::{BindParams, FmtExt},
    postgres::{Oid, PgFormat},
};

/// Encoded query parameter.
#[derive(Clone, PartialEq, Eq)]
pub struct Parameter {
    oid: Oid,
    format: PgFormat,
    value: Option<Bytes>,
}

impl Parameter {
    /// Parameter in binary format.
    pub fn binary(oid: Oid, value: Bytes) -> Parameter {
        Parameter { oid, format: PgFormat::Binary, value: Some(value) }
    }

    /// Parameter in text format.
    pub fn text(oid: Oid, value: Bytes) -> Parameter {
        Parameter { oid, format: PgFormat::Text, value: Some(value) }
    }

    /// NULL parameter.
    pub fn null(oid: Oid) -> Parameter {
        Parameter { oid, format: PgFormat::Binary, value: None }
    }

    /// Returns parameter type oid, `0` lets the server infer the type.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn format(&self) -> PgFormat {
        self.format
    }

    /// Returns the value, [`None`] for NULL.
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

impl Buf for Parameter {
    fn remaining(&self) -> usize {
        self.value.as_ref().map_or(0, Buf::remaining)
    }

    fn chunk(&self) -> &[u8] {
        match &self.value {
            Some(value) => Buf::chunk(value),
            None => &[],
        }
    }

    fn advance(&mut self, cnt: usize) {
        if let Some(value) = &mut self.value {
            Buf::advance(value, cnt);
        }
    }
}

impl BindParams for Parameter {
    fn size(&self) -> i32 {
        match &self.value {
            // length is checked against `i32::MAX` before binding
            Some(value) => value.len() as i32,
            None => -1,
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Parameter");
        dbg.field("oid", &self.oid).field("format", &self.format);
        match &self.value {
            Some(value) => dbg.field("value", &value.lossy()),
            None => dbg.field("value", &format_args!("NULL")),
        };
        dbg.finish()
    }
}

/// A query argument before encoding.
pub enum Argument {
    /// Value encoded by the first codec which accept it.
    Value {
        value: Box<dyn Any + Send + Sync>,
        type_name: &'static str,
    },
    /// NULL of the given type.
    Null(Target),
    /// Already encoded parameter, sent as is.
    Encoded(Parameter),
}

impl Argument {
    /// Argument encoded by the registry.
    pub fn value<T: Any + Send + Sync>(value: T) -> Argument {
        Argument::Value { value: Box::new(value), type_name: type_name::<T>() }
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value { type_name, .. } => write!(f, "Value({type_name})"),
            Self::Null(target) => write!(f, "Null({target:?})"),
            Self::Encoded(param) => param.fmt(f),
        }
    }
}

/// A value that can be used as query parameter.
///
/// Implemented for every type the builtin codecs encode. Types handled by
/// custom codecs can implement it with [`Argument::value`].
pub trait Encode {
    /// Convert into query argument.
    fn into_argument(self) -> Argument;

    /// The type requested when encoding NULL of this type.
    fn null_target() -> Target
    where
        Self: Sized;
}

impl<T: Scalar> Encode for T {
    fn into_argument(self) -> Argument {
        Argument::value(self)
    }

    fn null_target() -> Target {
        Target::of::<T>()
    }
}

impl Encode for &String {
    fn into_argument(self) -> Argument {
        Argument::value(self.clone())
    }

    fn null_target() -> Target {
        Target::of::<String>()
    }
}

impl<T: Encode> Encode for Option<T> {
    fn into_argument(self) -> Argument {
        match self {
            Some(value) => value.into_argument(),
            None => Argument::Null(T::null_target()),
        }
    }

    fn null_target() -> Target {
        T::null_target()
    }
}

impl Encode for &str {
    fn into_argument(self) -> Argument {
        Argument::value(self.to_owned())
    }

    fn null_target() -> Target {
        Target::of::<String>()
    }
}

impl Encode for &[u8] {
    fn into_argument(self) -> Argument {
        Argument::value(self.to_vec())
    }

    fn null_target() -> Target {
        Target::of::<Vec<u8>>()
    }
}

impl<T: Scalar> Encode for Vec<T> {
    fn into_argument(self) -> Argument {
        Argument::value(self)
    }

    fn null_target() -> Target {
        Target::of::<Vec<T>>()
    }
}

impl<T: Scalar> Encode for Vec<Option<T>> {
    fn into_argument(self) -> Argument {
        Argument::value(self)
    }

    fn null_target() -> Target {
        Target::of::<Vec<Option<T>>>()
    }
}

impl<T: RangeElement> Encode for PgRange<T> {
    fn into_argument(self) -> Argument {
        Argument::value(self)
    }

    fn null_target() -> Target {
        Target::of::<PgRange<T>>()
    }
}

impl Encode for Parameter {
    fn into_argument(self) -> Argument {
        Argument::Encoded(self)
    }

    fn null_target() -> Target {
        Target::ANY
    }
}

macro_rules! encode_value {
    ($($ty:ty),* $(,)?) => {$(
        impl Encode for $ty {
            fn into_argument(self) -> Argument {
                Argument::value(self)
            }

            fn null_target() -> Target {
                Target::of::<$ty>()
            }
        }
    )*};
}

encode_value!(Vec<u8>, Bytes, Json, PgEnum);

#[cfg(feature = "json")]
encode_value!(serde_json::Value);

#[cfg(test)]
mod test {
    use super::*;
    use crate::postgres::oid;

    #[test]
    fn bind_params_size() {
        let mut param = Parameter::binary(oid::INT4, Bytes::from_static(&[0, 0, 0, 1]));
        assert_eq!(param.size(), 4);
        param.advance(4);
        assert_eq!(param.remaining(), 0);
        assert_eq!(Parameter::null(oid::INT4).size(), -1);
    }

    #[test]
    fn option_null_target() {
        match None::<&str>.into_argument() {
            Argument::Null(target) => assert!(target.is::<String>()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(Some(1i64).into_argument(), Argument::Value { .. }));
    }
}
