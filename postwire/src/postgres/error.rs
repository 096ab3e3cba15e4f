//! Protocol error
use bytes::{Buf, Bytes};
use std::{borrow::Cow, fmt};

use super::BackendMessage;
use crate::{common::ByteStr, ext::BytesExt};

/// An error when translating buffer from postgres.
///
/// Any protocol error is fatal, the session cannot recover stream
/// synchronization afterwards.
pub enum ProtocolError {
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    UnknownAuth {
        auth: u32,
    },
    InvalidLength {
        msgtype: u8,
        len: i32,
    },
    FrameTooLarge {
        msgtype: u8,
        len: usize,
        max: usize,
    },
    Malformed {
        reason: Cow<'static, str>,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found = BackendMessage::message_name(*found);
                match expect {
                    Some(m) => {
                        write!(
                            f,
                            "Expected message `{}` found `{found}`",
                            BackendMessage::message_name(*m),
                        )?
                    },
                    None => write!(f, "Unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::UnknownAuth { auth } => write!(f, "Unknown authentication method `{auth}`"),
            ProtocolError::InvalidLength { msgtype, len } => write!(
                f,
                "Invalid length `{len}` for message `{}`",
                BackendMessage::message_name(*msgtype),
            ),
            ProtocolError::FrameTooLarge { msgtype, len, max } => write!(
                f,
                "Message `{}` of {len} bytes exceed the maximum of {max} bytes",
                BackendMessage::message_name(*msgtype),
            ),
            ProtocolError::Malformed { reason } => write!(f, "Malformed message: {reason}"),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn malformed(reason: impl Into<Cow<'static, str>>) -> ProtocolError {
        Self::Malformed { reason: reason.into() }
    }
}

/// Error or notice reported by the server.
///
/// Both `ErrorResponse` and `NoticeResponse` carry the same set of fields.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Clone, Default)]
pub struct DatabaseError {
    severity: ByteStr,
    code: ByteStr,
    message: ByteStr,
    detail: Option<ByteStr>,
    hint: Option<ByteStr>,
    position: Option<u32>,
    where_: Option<ByteStr>,
    schema: Option<ByteStr>,
    table: Option<ByteStr>,
    column: Option<ByteStr>,
    datatype: Option<ByteStr>,
    constraint: Option<ByteStr>,
    file: Option<ByteStr>,
    line: Option<u32>,
    routine: Option<ByteStr>,
}

impl DatabaseError {
    /// Parse the error fields body.
    ///
    /// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
    /// Fields can appear in any order. Unrecognized field types are silently ignored.
    pub(crate) fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut me = DatabaseError::default();
        let mut localized = None;

        loop {
            if !body.has_remaining() {
                return Err(ProtocolError::malformed("error fields is not nul terminated"));
            }
            let field = body.get_u8();
            if field == b'\0' {
                break;
            }
            let value = body.get_nul_bytestr()?;
            match field {
                b'S' => localized = Some(value),
                b'V' => me.severity = value,
                b'C' => me.code = value,
                b'M' => me.message = value,
                b'D' => me.detail = Some(value),
                b'H' => me.hint = Some(value),
                b'P' => me.position = value.parse().ok(),
                b'W' => me.where_ = Some(value),
                b's' => me.schema = Some(value),
                b't' => me.table = Some(value),
                b'c' => me.column = Some(value),
                b'd' => me.datatype = Some(value),
                b'n' => me.constraint = Some(value),
                b'F' => me.file = Some(value),
                b'L' => me.line = value.parse().ok(),
                b'R' => me.routine = Some(value),
                _ => {}
            }
        }

        // `V` is only present in server 9.6 and later
        if me.severity.is_empty() {
            me.severity = localized.unwrap_or_default();
        }

        Ok(me)
    }

    /// Non-localized severity: `ERROR`, `FATAL`, or `PANIC` for errors,
    /// `WARNING`, `NOTICE`, `DEBUG`, `INFO`, or `LOG` for notices.
    pub fn severity(&self) -> &str {
        &self.severity
    }

    /// The SQLSTATE code for the error.
    ///
    /// <https://www.postgresql.org/docs/current/errcodes-appendix.html>
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Optional secondary error message carrying more detail about the problem.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Optional suggestion what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Error cursor position as an index into the original query string, counted in characters from 1.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    /// Context in which the error occurred, such as a call stack traceback.
    pub fn where_(&self) -> Option<&str> {
        self.where_.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn datatype(&self) -> Option<&str> {
        self.datatype.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// Source-code file name where the error was reported.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// Source-code line number where the error was reported.
    pub fn line(&self) -> Option<u32> {
        self.line
    }

    /// Source-code routine reporting the error.
    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }

    /// Returns `true` when server terminate the session after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), "FATAL" | "PANIC")
    }
}

impl std::error::Error for DatabaseError { }

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.code, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("DatabaseError");
        f.field("severity", &self.severity);
        f.field("code", &self.code);
        f.field("message", &self.message);
        macro_rules! optional {
            ($($field:ident),*) => {$(
                if let Some(value) = &self.$field {
                    f.field(stringify!($field), value);
                }
            )*};
        }
        optional!(detail, hint, position, where_, schema, table, column, datatype, constraint, file, line, routine);
        f.finish()
    }
}
