//! `postwire` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, io};

use crate::{
    auth::AuthError,
    codec::{DecodeError, EncodeError},
    common::unit_error,
    connection::ParseError,
    postgres::{DatabaseError, ProtocolError},
    row::RowNotFound,
};

/// A specialized [`Result`] type for `postwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `postwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the error message with `context`.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns the server error, if this error is reported by the server.
    pub fn as_database(&self) -> Option<&DatabaseError> {
        match &self.kind {
            ErrorKind::Database(e) => Some(e),
            ErrorKind::Auth(AuthError::Rejected(e)) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` when the session is closed after this error.
    pub fn is_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Protocol(_)
            | ErrorKind::Io(_)
            | ErrorKind::Timeout(_)
            | ErrorKind::Closed(_)
            | ErrorKind::Auth(_) => true,
            ErrorKind::Database(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Returns `true` when retrying on a fresh connection may succeed.
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            ErrorKind::Io(_) | ErrorKind::Timeout(_) | ErrorKind::Closed(_) => true,
            // serialization_failure, deadlock_detected, admin_shutdown
            ErrorKind::Database(e) => matches!(e.code(), "40001" | "40P01" | "57P01"),
            _ => false,
        }
    }

    pub(crate) fn invalid_state(reason: impl Into<Cow<'static, str>>) -> Error {
        ErrorKind::InvalidState(reason.into()).into()
    }
}

/// All possible error kind from `postwire` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Io(io::Error),
    Timeout(Timeout),
    Closed(Closed),
    Database(DatabaseError),
    Aborted(Aborted),
    Auth(AuthError),
    Decode(DecodeError),
    Encode(EncodeError),
    InvalidState(Cow<'static, str>),
    RowNotFound(RowNotFound),
    EmptyQuery(EmptyQuery),
}

unit_error! {
    /// No message received from the server within the receive timeout.
    pub struct Timeout("timed out waiting for the server");
}

unit_error! {
    /// Operation on a closed session.
    pub struct Closed("connection closed");
}

unit_error! {
    /// Request skipped by the server because an earlier request in the same pipeline failed.
    pub struct Aborted("request aborted by an earlier error in the pipeline");
}

unit_error! {
    /// Server received an empty query string.
    pub struct EmptyQuery("empty query");
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<std::io::Error>e => ErrorKind::Io(e));
from!(<Timeout>e => ErrorKind::Timeout(e));
from!(<Closed>e => ErrorKind::Closed(e));
from!(<DatabaseError>e => ErrorKind::Database(e));
from!(<Aborted>e => ErrorKind::Aborted(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<EncodeError>e => ErrorKind::Encode(e));
from!(<RowNotFound>e => ErrorKind::RowNotFound(e));
from!(<EmptyQuery>e => ErrorKind::EmptyQuery(e));

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Database(e) => Some(e),
            Self::Auth(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Closed(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Aborted(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Encode(e) => e.fmt(f),
            Self::InvalidState(reason) => write!(f, "invalid state: {reason}"),
            Self::RowNotFound(e) => e.fmt(f),
            Self::EmptyQuery(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fatal_and_transient() {
        assert!(Error::from(Closed).is_fatal());
        assert!(Error::from(Timeout).is_transient());
        assert!(!Error::from(Aborted).is_fatal());
        assert!(!Error::from(DecodeError::Null).is_fatal());
        assert!(Error::from(AuthError::MissingPassword).is_fatal());
        assert!(!Error::from(AuthError::MissingPassword).is_transient());
    }

    #[test]
    fn context_prefix() {
        let err = Error::from(EmptyQuery).context("execute");
        assert_eq!(err.to_string().lines().next(), Some("execute: empty query"));
    }
}
