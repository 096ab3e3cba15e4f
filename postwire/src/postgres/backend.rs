//! Postgres Backend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{Buf, Bytes};

use super::{DatabaseError, Oid, PgFormat, ProtocolError};
use crate::{
    common::ByteStr,
    ext::{BufExt, BytesExt},
};

/// A type that can be decoded into postgres backend message
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    CopyBothResponse(CopyBothResponse),
    CopyData(CopyData),
    CopyDone(CopyDone),
    CopyInResponse(CopyInResponse),
    CopyOutResponse(CopyOutResponse),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyBothResponse,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    ErrorResponse,
    EmptyQueryResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE,$typ))
        }
    };
}

/// Reject leftover bytes after a fully decoded body.
fn finish(body: &Bytes) -> Result<(), ProtocolError> {
    match body.is_empty() {
        true => Ok(()),
        false => Err(ProtocolError::malformed("trailing bytes after message body")),
    }
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8;4],
    },
    /// Specifies that GSSAPI authentication is required.
    GSS,
    /// GSSAPI or SSPI authentication data.
    GSSContinue {
        data: Bytes,
    },
    /// Specifies that SSPI authentication is required.
    SSPI,
    /// Specifies that SASL authentication is required.
    SASL {
        /// SASL authentication mechanisms, in the server's order of preference.
        mechanisms: Vec<ByteStr>,
    },
    /// Specifies that this message contains a SASL challenge.
    SASLContinue {
        /// SASL data, specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Specifies that SASL authentication has completed.
    SASLFinal {
        /// SASL outcome "additional data", specific to the SASL mechanism being used.
        data: Bytes,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    /// Name of the authentication method.
    pub fn method_name(&self) -> &'static str {
        match self {
            Authentication::Ok => "AuthenticationOk",
            Authentication::KerberosV5 => "KerberosV5",
            Authentication::CleartextPassword => "CleartextPassword",
            Authentication::MD5Password { .. } => "MD5Password",
            Authentication::GSS => "GSS",
            Authentication::GSSContinue { .. } => "GSSContinue",
            Authentication::SSPI => "SSPI",
            Authentication::SASL { .. } => "SASL",
            Authentication::SASLContinue { .. } => "SASLContinue",
            Authentication::SASLFinal { .. } => "SASLFinal",
        }
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let auth = match body.checked_u32()? {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => Authentication::MD5Password { salt: body.checked_u32()?.to_be_bytes(), },
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            10 => {
                // A zero byte is required as terminator after the last authentication mechanism name.
                let mut mechanisms = vec![];
                loop {
                    let name = body.get_nul_bytestr()?;
                    if name.is_empty() {
                        break;
                    }
                    mechanisms.push(name);
                }
                Authentication::SASL { mechanisms }
            },
            11 => Authentication::SASLContinue { data: body },
            12 => Authentication::SASLFinal { data: body },
            auth => return Err(ProtocolError::unknown_auth(auth)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: body.checked_u32()?,
            secret_key: body.checked_u32()?,
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: ByteStr,
    /// The current value of the parameter
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse {
    pub fields: DatabaseError,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(NoticeResponse { fields: DatabaseError::decode(body)? })
    }
}

/// Identifies the message as an error
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
///
/// For each field there is the following:
///
/// `Byte1` A code identifying the field type; if zero, this is the message terminator and no string follows.
/// The presently defined field types are listed in Section 53.8.
/// Since more field types might be added in future,
/// frontends should silently ignore fields of unrecognized type.
///
/// `String` The field value.
#[derive(Debug)]
pub struct ErrorResponse {
    pub fields: DatabaseError,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { fields: DatabaseError::decode(body)? })
    }
}

/// Identifies the message as a notification response.
#[derive(Debug, Clone)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: u32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The “payload” string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: body.checked_u32()?,
            channel: body.get_nul_bytestr()?,
            payload: body.get_nul_bytestr()?,
        })
    }
}

/// Metadata of a single result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: Oid,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub column_id: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size (see pg_type.typlen). Note that negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier (see pg_attribute.atttypmod). The meaning of the modifier is type-specific.
    pub type_modifier: i32,
    /// The format code being used for the field.
    ///
    /// In a RowDescription returned from the statement variant of Describe,
    /// the format code is not yet known and will always be [`Text`][PgFormat::Text].
    pub format: PgFormat,
}

/// Identifies the message as a row description
#[derive(Debug)]
pub struct RowDescription {
    pub columns: Vec<ColumnDescriptor>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.checked_u16()?;
        let mut columns = Vec::with_capacity(len as usize);
        for _ in 0..len {
            columns.push(ColumnDescriptor {
                name: body.get_nul_bytestr()?,
                table_oid: body.checked_u32()?,
                column_id: body.checked_i16()?,
                type_oid: body.checked_u32()?,
                type_size: body.checked_i16()?,
                type_modifier: body.checked_i32()?,
                format: PgFormat::from_code(body.checked_u16()?)
                    .ok_or_else(|| ProtocolError::malformed("unknown format code"))?,
            });
        }
        finish(&body)?;
        Ok(Self { columns })
    }
}

#[derive(Debug)]
/// Identifies the message as a data row.
pub struct DataRow {
    /// Column values, `None` for NULL.
    pub values: Vec<Option<Bytes>>,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.checked_u16()?;
        let mut values = Vec::with_capacity(len as usize);
        for _ in 0..len {
            // As a special case, -1 indicates a NULL column value. No value bytes follow in the NULL case.
            let value = match body.checked_i32()? {
                -1 => None,
                len @ 0.. => Some(body.checked_split(len as usize)?),
                _ => return Err(ProtocolError::malformed("negative column length")),
            };
            values.push(value);
        }
        finish(&body)?;
        Ok(Self { values })
    }
}

/// Identifies the message as a command-completed response
///
/// For an INSERT command, the tag is INSERT oid rows, where rows is the number of rows inserted.
/// oid used to be the object ID of the inserted row if rows was 1 and the target table had OIDs,
/// but OIDs system columns are not supported anymore; therefore oid is always 0.
///
/// For a DELETE command, the tag is DELETE rows where rows is the number of rows deleted.
///
/// For an UPDATE command, the tag is UPDATE rows where rows is the number of rows updated.
///
/// For a MERGE command, the tag is MERGE rows where rows is the number of rows inserted, updated, or deleted.
///
/// For a SELECT or CREATE TABLE AS command, the tag is SELECT rows where rows is the number of rows retrieved.
///
/// For a MOVE command, the tag is MOVE rows where rows is the number of rows
/// the cursor's position has been changed by.
///
/// For a FETCH command, the tag is FETCH rows where rows is the number of rows that have
/// been retrieved from the cursor.
///
/// For a COPY command, the tag is COPY rows where rows is the number of rows copied.
/// (Note: the row count appears only in PostgreSQL 8.2 and later.)
#[derive(Debug, Clone)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';

    /// Number of rows affected by the command, zero for commands without row count.
    pub fn rows_affected(&self) -> u64 {
        rows_affected(&self.tag)
    }
}

/// Number of rows affected reported by a `CommandComplete` tag.
pub fn rows_affected(tag: &str) -> u64 {
    let mut whs = tag.split_whitespace();
    let Some(tag) = whs.next() else {
        return 0;
    };
    let Some(rows) = whs.next() else {
        return 0;
    };
    match tag {
        "INSERT" => whs.next().unwrap_or_default(),
        "SELECT" => rows,
        "UPDATE" => rows,
        "DELETE" => rows,
        "MERGE" => rows,
        "FETCH" => rows,
        "MOVE" => rows,
        "COPY" => rows,
        _ => return 0,
    }
    .parse()
    .unwrap_or_default()
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major protocol version requested by the client.
    pub minor: u32,
    /// Protocol options not recognized by the server.
    pub options: Vec<ByteStr>,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let minor = body.checked_u32()?;
        let len = body.checked_u32()?;
        let mut options = Vec::with_capacity(len.min(64) as usize);
        for _ in 0..len {
            options.push(body.get_nul_bytestr()?);
        }
        Ok(Self { minor, options })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The object ID of each parameter data type.
    pub oids: Vec<Oid>,
}

impl ParameterDescription  {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.checked_u16()?;
        let mut oids = Vec::with_capacity(len as usize);
        for _ in 0..len {
            oids.push(body.checked_u32()?);
        }
        finish(&body)?;
        Ok(Self { oids })
    }
}

/// Current backend transaction status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    #[default]
    Idle,
    /// In a transaction block.
    Transaction,
    /// In a failed transaction block, queries will be rejected until block is ended.
    Failed,
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let status = match body.checked_u8()? {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::Transaction,
            b'E' => TransactionStatus::Failed,
            _ => return Err(ProtocolError::malformed("unknown transaction status")),
        };
        Ok(Self { status })
    }
}

/// Format information of a COPY operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    /// Overall COPY format.
    pub format: PgFormat,
    /// The format codes to be used for each column.
    ///
    /// If overall format is [`Text`][PgFormat::Text], all these must be [`Text`][PgFormat::Text].
    pub column_formats: Vec<PgFormat>,
}

impl CopyResponse {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let format = match body.checked_u8()? {
            0 => PgFormat::Text,
            1 => PgFormat::Binary,
            _ => return Err(ProtocolError::malformed("unknown copy format")),
        };
        let len = body.checked_u16()?;
        let mut column_formats = Vec::with_capacity(len as usize);
        for _ in 0..len {
            column_formats.push(
                PgFormat::from_code(body.checked_u16()?)
                    .ok_or_else(|| ProtocolError::malformed("unknown format code"))?,
            );
        }
        finish(&body)?;
        Ok(Self { format, column_formats })
    }
}

macro_rules! copy_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name {
                pub response: CopyResponse,
            }

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
                    assert_msgtype!(msgtype);
                    Ok(Self { response: CopyResponse::decode(body)? })
                }
            }
    )*};
}

copy_msg! {
    /// Identifies the message as a Start Copy In response.
    ///
    /// The frontend must now send copy-in data.
    struct CopyInResponse, b'G';

    /// Identifies the message as a Start Copy Out response.
    ///
    /// This message will be followed by copy-out data.
    struct CopyOutResponse, b'H';

    /// Identifies the message as a Start Copy Both response.
    ///
    /// This message is used only for Streaming Replication.
    struct CopyBothResponse, b'W';
}

/// Identifies the message as COPY data.
#[derive(Debug)]
pub struct CopyData {
    /// Data that forms part of a COPY data stream.
    ///
    /// Messages sent from the backend will always correspond to single data rows.
    pub data: Bytes,
}

impl CopyData {
    pub const MSGTYPE: u8 = b'd';
}

impl BackendProtocol for CopyData {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { data: body })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self,ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected(Self::MSGTYPE,msgtype))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(msgtype: u8, body: &'static [u8]) -> Result<BackendMessage, ProtocolError> {
        BackendMessage::decode(msgtype, Bytes::from_static(body))
    }

    #[test]
    fn rows_affected() {
        let tag = |tag: &'static str| CommandComplete { tag: ByteStr::from_static(tag) }.rows_affected();
        assert_eq!(tag("INSERT 0 5"), 5);
        assert_eq!(tag("SELECT 3"), 3);
        assert_eq!(tag("UPDATE 10"), 10);
        assert_eq!(tag("COPY 2"), 2);
        assert_eq!(tag("CREATE TABLE"), 0);
        assert_eq!(tag("BEGIN"), 0);
    }

    #[test]
    fn data_row_with_null() {
        let Ok(BackendMessage::DataRow(row)) = decode(b'D', b"\0\x02\0\0\0\x01a\xff\xff\xff\xff") else {
            panic!("expected DataRow");
        };
        assert_eq!(row.values, vec![Some(Bytes::from_static(b"a")), None]);
    }

    #[test]
    fn data_row_overflowing_column() {
        assert!(decode(b'D', b"\0\x01\0\0\0\x09a").is_err());
    }

    #[test]
    fn row_description() {
        let body = b"\0\x01id\0\0\0\0\0\0\0\0\0\0\x17\0\x04\xff\xff\xff\xff\0\x01";
        let Ok(BackendMessage::RowDescription(rd)) = decode(b'T', body) else {
            panic!("expected RowDescription");
        };
        assert_eq!(rd.columns.len(), 1);
        assert_eq!(rd.columns[0].name, "id");
        assert_eq!(rd.columns[0].type_oid, 23);
        assert_eq!(rd.columns[0].format, PgFormat::Binary);
    }

    #[test]
    fn sasl_mechanisms() {
        let body = b"\0\0\0\x0aSCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0";
        let Ok(BackendMessage::Authentication(Authentication::SASL { mechanisms })) = decode(b'R', body) else {
            panic!("expected SASL");
        };
        assert_eq!(mechanisms, ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
    }

    #[test]
    fn unknown_message() {
        assert!(decode(b'?', b"").is_err());
    }

    #[test]
    fn ready_for_query() {
        let Ok(BackendMessage::ReadyForQuery(rfq)) = decode(b'Z', b"T") else {
            panic!("expected ReadyForQuery");
        };
        assert_eq!(rfq.status, TransactionStatus::Transaction);
    }
}
