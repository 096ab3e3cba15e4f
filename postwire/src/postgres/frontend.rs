//! Postgres Frontend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{BufMut, BytesMut};

use super::{Oid, PgFormat};
use crate::{
    common::ByteStr,
    ext::{BindParams, BufMutExt, StrExt, UsizeExt},
};

/// Write a frontend message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size_hint = msg.size_hint();
    buf.reserve(PREFIX + size_hint as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_u32(4 + size_hint);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size_hint as usize,
        "Frontend message body size not equal to size hint"
    );
}

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Size of the main body.
    ///
    /// Note that this is **only** the size of main body as oppose of actual postgres message which
    /// include the length itself.
    fn size_hint(&self) -> u32;

    /// Write the main body of the message.
    ///
    /// The lenght of body written must be equal to the
    /// length returned by [`size_hint`][FrontendProtocol::size_hint].
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup frontend message
///
/// For historical reasons, the very first message sent by the client (the [`Startup`] message)
/// has no initial message-type byte, thus [`Startup`] does not implement [`FrontendProtocol`].
///
/// To write startup message, use [`Startup::write`].
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
    /// Other run-time parameters, such as `application_name`.
    ///
    /// Parameter names beginning with _pq_. are reserved for use as protocol extensions,
    /// while others are treated as run-time parameters to be set at backend start time.
    pub params: &'a [(ByteStr, ByteStr)],
}

impl Startup<'_> {
    /// The protocol version number.
    ///
    /// The most significant 16 bits are the major version number (3 for the protocol described here).
    /// The least significant 16 bits are the minor version number (0 for the protocol described here).
    pub const PROTOCOL_VERSION: u32 = 196_608;

    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_u32(0);

        buf.put_u32(Self::PROTOCOL_VERSION);

        // The protocol version number is followed by one or more pairs of parameter name and value strings.

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }

        for (name, value) in self.params {
            buf.put_nul_string(name);
            buf.put_nul_string(value);
        }

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        // write the length
        let mut written_buf = &mut buf[offset..];
        written_buf.put_u32(written_buf.len().to_u32());
    }
}

/// Request the server to perform TLS handshake.
///
/// Like [`Startup`], this message has no message-type byte. Server respond
/// with a single byte, `S` to proceed with TLS or `N` to decline.
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    /// The SSL request code.
    pub const CODE: u32 = 80_877_103;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_u32(8);
        buf.put_u32(Self::CODE);
    }
}

/// Request the server to cancel the query currently running in another session.
///
/// Sent over a fresh connection, without message-type byte. Server process
/// the request and close the connection without response.
#[derive(Debug)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: u32,
    /// The secret key for the target backend.
    pub secret_key: u32,
}

impl CancelRequest {
    /// The cancel request code.
    pub const CODE: u32 = 80_877_102;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_u32(16);
        buf.put_u32(Self::CODE);
        buf.put_u32(self.process_id);
        buf.put_u32(self.secret_key);
    }
}

macro_rules! size_of {
    ($s1:tt.$f1:ident as $t1:ty, in ..$s2:tt.$f2:ident) => {
        ($s2.$f2 as u32 * u32::try_from(size_of::<$t1>()).expect("data type size too large for postgres"))
    };
    ($self:tt.$field:ident) => {
        u32::try_from(size_of_val(&$self.$field)).expect("data type size too large for postgres")
    };
}

/// Identifies the message as a password response.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested)
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> u32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as a simple query
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> u32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command
pub struct Parse<'a,I> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// The number of parameter data types specified (can be zero).
    ///
    /// Note that this is not an indication of the number of parameters that might appear in the query string,
    /// only the number that the frontend wants to prespecify types for.
    ///
    /// For each parameter, there is the following `data_types`
    pub oids_len: u16,
    /// Specifies the object ID of the parameter data type.
    ///
    /// Placing a zero here is equivalent to leaving the type unspecified.
    pub oids: I,
}

impl<I> FrontendProtocol for Parse<'_,I>
where
    I: IntoIterator<Item = Oid>
{
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> u32 {
        self.prepare_name.nul_string_len()
            + self.sql.nul_string_len()
            + size_of!(self.oids_len)
            + size_of!(self.oids as Oid, in ..self.oids_len)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_u16(self.oids_len);
        for oid in self.oids {
            buf.put_u32(oid);
        }
    }
}

/// Identifies the message as a Sync command
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a Flush command
pub struct Flush;

impl FrontendProtocol for Flush {
    const MSGTYPE: u8 = b'H';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a Bind command.
pub struct Bind<'a, ParamFmts, Params, ResultFmts> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub stmt_name: &'a str,

    /// The number of parameter format codes that follow.
    ///
    /// This can be zero to indicate that there are no parameters or that the parameters
    /// all use the default format (text); or one, in which case the specified format code
    /// is applied to all parameters; or it can equal the actual number of parameters.
    pub param_formats_len: u16,

    /// The parameter [`PgFormat`].
    pub param_formats: ParamFmts,

    /// The number of parameter values that follow (possibly zero).
    ///
    /// This must match the number of parameters needed by the query.
    pub params_len: u16,

    /// This is not postgres field, but a workaround helper to get `size_hint` easily.
    pub params_size_hint: u32,

    /// Int32 The length of the parameter value, in bytes (this count does not include itself). Can be zero.
    /// As a special case, -1 indicates a NULL parameter value. No value bytes follow in the NULL case
    ///
    /// followed by
    ///
    /// The value of the parameter, in the format indicated by the associated format code. n is the above length.
    pub params: Params,

    /// The number of result-column format codes that follow.
    ///
    /// This can be zero to indicate that there are no result columns or that the result
    /// columns should all use the default format (text); or one, in which case the
    /// specified format code is applied to all result columns (if any); or it can equal
    /// the actual number of result columns of the query.
    pub result_formats_len: u16,

    /// The result-columns [`PgFormat`].
    pub result_formats: ResultFmts,
}

impl<ParamFmts, Params, ResultFmts> FrontendProtocol for Bind<'_, ParamFmts, Params, ResultFmts>
where
    ParamFmts: IntoIterator<Item = PgFormat>,
    Params: Iterator + ExactSizeIterator,
    <Params as Iterator>::Item: BindParams,
    ResultFmts: IntoIterator<Item = PgFormat>,
{
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len()
            + self.stmt_name.nul_string_len()
            + size_of!(self.param_formats_len)
            + size_of!(self.param_formats as u16, in ..self.param_formats_len)
            + size_of!(self.params_len)
            + self.params_size_hint
            + size_of!(self.result_formats_len)
            + size_of!(self.result_formats as u16, in ..self.result_formats_len)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        buf.put_u16(self.param_formats_len);
        for format in self.param_formats {
            buf.put_u16(format.format_code());
        }

        buf.put_u16(self.params_len);
        for param in self.params {
            // can be -1 for NULL
            buf.put_i32(param.size());
            buf.put(param);
        }

        buf.put_u16(self.result_formats_len);
        for format in self.result_formats {
            buf.put_u16(format.format_code());
        }
    }
}

/// Identifies the message as a Execute command
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes “no limit”.
    pub max_row: u32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len() + size_of!(self.max_row)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_u32(self.max_row);
    }
}

/// Identifies the message as a Close command
pub struct Close<'a> {
    /// 'S' to close a prepared statement; or 'P' to close a portal.
    pub variant: u8,
    /// The name of the prepared statement or portal to close
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> u32 {
        size_of!(self.variant) + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.variant);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> u32 {
        size_of!(self.kind) + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}



/// Identifies the message as an initial SASL response.
pub struct SaslInitialResponse<'a> {
    /// Name of the SASL authentication mechanism that the client selected.
    pub mechanism: &'a str,
    /// SASL mechanism specific "Initial Response".
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslInitialResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> u32 {
        self.mechanism.nul_string_len() + 4 + self.data.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.mechanism);
        buf.put_i32(self.data.len().to_u32() as i32);
        buf.put_slice(self.data);
    }
}

/// Identifies the message as a SASL response.
pub struct SaslResponse<'a> {
    /// SASL mechanism specific message data.
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> u32 {
        self.data.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

/// Identifies the message as COPY data.
pub struct CopyData<'a> {
    /// Data that forms part of a COPY data stream.
    pub data: &'a [u8],
}

impl FrontendProtocol for CopyData<'_> {
    const MSGTYPE: u8 = b'd';

    fn size_hint(&self) -> u32 {
        self.data.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

/// Identifies the message as a COPY-complete indicator.
pub struct CopyDone;

impl FrontendProtocol for CopyDone {
    const MSGTYPE: u8 = b'c';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a COPY-failure indicator.
pub struct CopyFail<'a> {
    /// An error message to report as the cause of failure.
    pub message: &'a str,
}

impl FrontendProtocol for CopyFail<'_> {
    const MSGTYPE: u8 = b'f';

    fn size_hint(&self) -> u32 {
        self.message.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.message);
    }
}

/// Identifies the message as a termination.
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn startup_layout() {
        let mut buf = BytesMut::new();
        let params = [(ByteStr::from_static("application_name"), ByteStr::from_static("app"))];
        Startup { user: "postgres", database: Some("db"), params: &params }.write(&mut buf);

        let expected = b"user\0postgres\0database\0db\0application_name\0app\0\0";
        assert_eq!(&buf[..4], &(8 + expected.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..8], &196_608u32.to_be_bytes());
        assert_eq!(&buf[8..], expected);
    }

    #[test]
    fn cancel_request_layout() {
        let mut buf = BytesMut::new();
        CancelRequest { process_id: 7, secret_key: 42 }.write(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 16, 4, 210, 22, 46, 0, 0, 0, 7, 0, 0, 0, 42]);
    }

    #[test]
    fn execute_layout() {
        let mut buf = BytesMut::new();
        write(Execute { portal_name: "", max_row: 10 }, &mut buf);
        assert_eq!(&buf[..], b"E\0\0\0\x09\0\0\0\0\x0a");
    }

    #[test]
    fn sasl_initial_response_layout() {
        let mut buf = BytesMut::new();
        write(SaslInitialResponse { mechanism: "SCRAM-SHA-256", data: b"n,,n=,r=abc" }, &mut buf);
        assert_eq!(buf[0], b'p');
        assert_eq!(&buf[1..5], &(4 + 14 + 4 + 11u32).to_be_bytes());
        assert_eq!(&buf[5..19], b"SCRAM-SHA-256\0");
        assert_eq!(&buf[19..23], &11i32.to_be_bytes());
        assert_eq!(&buf[23..], b"n,,n=,r=abc");
    }
}
