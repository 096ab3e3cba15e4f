use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error};

use crate::postgres::{Oid, PgFormat};

macro_rules! from {
    (<$ty:ty>$pat:pat => $err:ident::$variant:ident($value:expr)) => {
        impl From<$ty> for $err {
            fn from($pat: $ty) -> Self {
                $err::$variant($value)
            }
        }
    };
}

/// An error when decoding row value.
///
/// Decode errors are reported for the affected value only, the session stays usable.
pub enum DecodeError {
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// The codec selected for the column produced a different type than requested.
    TypeMismatch {
        oid: Oid,
        target: &'static str,
    },
    /// No codec accept the column and unknown type policy is [`Reject`][super::UnknownTypePolicy::Reject].
    UnsupportedType {
        oid: Oid,
        format: PgFormat,
    },
    /// Row is null.
    Null,
    /// Value bytes is malformed for its type.
    Invalid(Cow<'static,str>),
    /// Failed to deserialize using `serde_json`.
    #[cfg(feature = "json")]
    Json(serde_json::error::Error),
    /// Error from user defined codec.
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl DecodeError {
    pub(crate) fn invalid(reason: impl Into<Cow<'static, str>>) -> DecodeError {
        DecodeError::Invalid(reason.into())
    }

    pub(crate) fn invalid_len(expect: usize, found: usize) -> DecodeError {
        DecodeError::Invalid(format!("expected {expect} bytes, found {found}").into())
    }

    /// Create an error from user defined codec.
    pub fn custom(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> DecodeError {
        DecodeError::Custom(error.into())
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::TypeMismatch { oid, target } => write!(f, "data type mismatch, oid {oid} cannot decode into `{target}`"),
            Self::UnsupportedType { oid, format } => write!(f, "no codec for oid {oid} in {format:?} format"),
            Self::Null => write!(f, "unexpected NULL value"),
            Self::Invalid(reason) => write!(f, "{reason}"),
            #[cfg(feature = "json")]
            Self::Json(e) => write!(f, "{e}"),
            Self::Custom(e) => write!(f, "{e}"),
        }
    }
}

from!(<Utf8Error>e => DecodeError::Utf8(e));
from!(<FromUtf8Error>e => DecodeError::Utf8(e.utf8_error()));
#[cfg(feature = "json")]
from!(<serde_json::error::Error>e => DecodeError::Json(e));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// An error when encoding query parameter.
///
/// Encoding happens before anything is written to the connection, so the
/// session stays usable.
pub enum EncodeError {
    /// No codec accept the value.
    Unsupported {
        type_name: &'static str,
    },
    /// Value cannot be represented in postgres.
    Invalid(Cow<'static,str>),
    /// Protocol limit the number of parameters to `u16::MAX`.
    TooManyParameters(usize),
    /// Number of parameters does not match the prepared statement.
    ParameterCount {
        expect: usize,
        found: usize,
    },
    /// Parameter type does not match the prepared statement.
    TypeMismatch {
        position: usize,
        expect: Oid,
        found: Oid,
    },
    /// Failed to serialize using `serde_json`.
    #[cfg(feature = "json")]
    Json(serde_json::error::Error),
    /// Error from user defined codec.
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl EncodeError {
    pub(crate) fn invalid(reason: impl Into<Cow<'static, str>>) -> EncodeError {
        EncodeError::Invalid(reason.into())
    }

    /// Create an error from user defined codec.
    pub fn custom(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> EncodeError {
        EncodeError::Custom(error.into())
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to encode parameter, ")?;
        match self {
            Self::Unsupported { type_name } => write!(f, "no codec accept `{type_name}`"),
            Self::Invalid(reason) => write!(f, "{reason}"),
            Self::TooManyParameters(n) => write!(f, "{n} parameters exceed protocol limit of {}", u16::MAX),
            Self::ParameterCount { expect, found } => write!(f, "statement expect {expect} parameters, found {found}"),
            Self::TypeMismatch { position, expect, found } => write!(
                f,
                "parameter ${} expect oid {expect}, found {found}",
                position + 1,
            ),
            #[cfg(feature = "json")]
            Self::Json(e) => write!(f, "{e}"),
            Self::Custom(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(feature = "json")]
from!(<serde_json::error::Error>e => EncodeError::Json(e));

impl std::error::Error for EncodeError { }

impl fmt::Debug for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
