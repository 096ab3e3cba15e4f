//! Sans-io protocol session.
//!
//! [`Session`] holds the read and write buffers and the queue of requests
//! waiting for a response. It never touch the socket: the driver appends
//! received bytes to [`read_buf`][Session::read_buf], calls
//! [`process`][Session::process], then drains [`Event`]s and writes
//! [`write_buf`][Session::write_buf] out.
//!
//! Responses arrive in request order, each backend message is routed to the
//! request at the front of the pending queue.
//!
//! ```text
//! Connecting -> Authenticating -> ReadyIdle <-> SimpleQuery | ExtendedQuery | Copy
//!                                     ^                           |
//!                                     +--------- Draining <-------+ ErrorResponse
//! ```
use bytes::{Buf, BytesMut};
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    codec::EncodeError,
    common::{ByteStr, report, verbose},
    encode::Parameter,
    error::Closed,
    ext::UsizeExt,
    postgres::{
        BackendMessage, DatabaseError, Oid, PgFormat, ProtocolError, TransactionStatus,
        backend::ReadyForQuery,
        frame::{self, DEFAULT_MAX_FRAME},
        frontend,
    },
    Error,
};

mod event;
mod startup;

pub use event::{AsyncMessage, Event, RequestId};
pub use startup::{AuthMechanism, BackendKey, StartupConfig};

use startup::Credentials;

const DEFAULT_BUF_CAPACITY: usize = 8 * 1024;

/// Session state, derived from the pending request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    Authenticating(AuthMechanism),
    ReadyIdle,
    SimpleQuery,
    ExtendedQuery(ExtendedStep),
    Copy(CopyDirection),
    /// An error occured, responses are discarded until `ReadyForQuery`.
    Draining,
    Closed,
}

/// Extended query message waiting for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedStep {
    Parse,
    Bind,
    Describe,
    Execute,
    Close,
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Startup,
    Simple,
    Parse,
    Bind,
    DescribePortal,
    DescribeStatement,
    Execute,
    Close,
    Sync,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    id: RequestId,
    kind: Kind,
}

/// Postgres protocol session state machine.
pub struct Session {
    read_buf: BytesMut,
    write_buf: BytesMut,
    pending: VecDeque<Pending>,
    events: VecDeque<Event>,
    next_id: u64,
    max_frame: usize,

    credentials: Option<Credentials>,
    mechanism: Option<AuthMechanism>,
    authenticated: bool,

    draining: bool,
    copy: Option<CopyDirection>,
    /// COPY FROM STDIN started by `Execute`, the server ignored any `Sync` sent before.
    copy_resync: bool,
    /// Column count of the last `RowDescription`, checked against every `DataRow`.
    row_width: Option<usize>,
    closed: bool,

    backend_key: Option<BackendKey>,
    status: TransactionStatus,
    parameters: HashMap<String, ByteStr>,
    observer: Option<UnboundedSender<AsyncMessage>>,
}

impl Session {
    /// Create new session and write the startup message.
    ///
    /// The startup is the first pending request, its [`Event::Ready`] marks
    /// the session ready for queries.
    pub fn new(config: &StartupConfig) -> Session {
        let mut write_buf = BytesMut::with_capacity(DEFAULT_BUF_CAPACITY);
        frontend::Startup {
            user: &config.user,
            database: config.database.as_deref(),
            params: &config.params,
        }
        .write(&mut write_buf);

        let mut pending = VecDeque::new();
        pending.push_back(Pending { id: RequestId(0), kind: Kind::Startup });

        Session {
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf,
            pending,
            events: VecDeque::new(),
            next_id: 1,
            max_frame: DEFAULT_MAX_FRAME,
            credentials: Some(Credentials::new(config)),
            mechanism: None,
            authenticated: false,
            draining: false,
            copy: None,
            copy_resync: false,
            row_width: None,
            closed: false,
            backend_key: None,
            status: TransactionStatus::Idle,
            parameters: HashMap::new(),
            observer: None,
        }
    }

    /// Request id of the startup.
    pub fn startup_id(&self) -> RequestId {
        RequestId(0)
    }

    /// Set maximum size of a single backend message.
    pub fn set_max_frame(&mut self, max_frame: usize) {
        self.max_frame = max_frame;
    }

    /// Route asynchronous messages into `observer`, replacing previous one.
    pub fn set_observer(&mut self, observer: UnboundedSender<AsyncMessage>) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> State {
        if self.closed {
            return State::Closed;
        }
        if self.draining {
            return State::Draining;
        }
        if let Some(copy) = self.copy {
            return State::Copy(copy);
        }
        let Some(head) = self.pending.front() else {
            return State::ReadyIdle;
        };
        match head.kind {
            Kind::Startup => match self.mechanism {
                Some(mech) => State::Authenticating(mech),
                None => State::Connecting,
            },
            Kind::Simple => State::SimpleQuery,
            Kind::Parse => State::ExtendedQuery(ExtendedStep::Parse),
            Kind::Bind => State::ExtendedQuery(ExtendedStep::Bind),
            Kind::DescribePortal | Kind::DescribeStatement => State::ExtendedQuery(ExtendedStep::Describe),
            Kind::Execute => State::ExtendedQuery(ExtendedStep::Execute),
            Kind::Close => State::ExtendedQuery(ExtendedStep::Close),
            Kind::Sync => State::ExtendedQuery(ExtendedStep::Sync),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// No request waiting for response and no undelivered event.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.events.is_empty()
    }

    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    /// Transaction status reported by the last `ReadyForQuery`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    /// Server run-time parameter reported by `ParameterStatus`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(ByteStr::as_str)
    }

    // ===== io side =====

    /// Buffer for bytes received from the server.
    pub fn read_buf(&mut self) -> &mut BytesMut {
        &mut self.read_buf
    }

    /// Bytes waiting to be sent to the server.
    pub fn write_buf(&mut self) -> &mut BytesMut {
        &mut self.write_buf
    }

    pub fn has_pending_write(&self) -> bool {
        self.write_buf.has_remaining()
    }

    /// Take the next event.
    pub fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Decode and route every complete message in the read buffer.
    ///
    /// Any error returned is fatal and the session is closed.
    pub fn process(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(Closed.into());
        }

        loop {
            let msg = match frame::decode_message(&mut self.read_buf, self.max_frame) {
                Ok(Some(msg)) => msg,
                Ok(None) => return Ok(()),
                Err(err) => return Err(self.fatal(err.into())),
            };

            verbose!(msgtype = BackendMessage::message_name(msg.msgtype()), state = ?self.state(), "recv");

            if let Err(err) = self.handle(msg) {
                return Err(self.fatal(err));
            }

            if self.closed {
                return Ok(());
            }
        }
    }

    /// Close the session, dropping every pending request.
    ///
    /// Events already routed are kept.
    pub fn fail(&mut self) {
        self.closed = true;
        self.draining = false;
        self.copy = None;
        self.copy_resync = false;
        self.pending.clear();
        self.read_buf.clear();
        self.write_buf.clear();
    }

    fn fatal(&mut self, err: Error) -> Error {
        report!(error, "session closed: {err}");
        self.fail();
        err
    }

    // ===== requests =====

    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        id
    }

    fn check_request(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Closed.into());
        }
        if !self.authenticated || self.pending.front().is_some_and(|p| p.kind == Kind::Startup) {
            return Err(Error::invalid_state("startup is not finished"));
        }
        if self.copy == Some(CopyDirection::In) {
            return Err(Error::invalid_state("COPY FROM STDIN in progress"));
        }
        Ok(())
    }

    fn push(&mut self, id: RequestId, kind: Kind) {
        self.pending.push_back(Pending { id, kind });
    }

    /// Send a simple query, which may contains multiple statements.
    pub fn simple_query(&mut self, id: RequestId, sql: &str) -> Result<(), Error> {
        self.check_request()?;
        frontend::write(frontend::Query { sql }, &mut self.write_buf);
        self.push(id, Kind::Simple);
        Ok(())
    }

    pub fn parse(&mut self, id: RequestId, name: &str, sql: &str, types: &[Oid]) -> Result<(), Error> {
        self.check_request()?;
        if types.len() > u16::MAX as usize {
            return Err(EncodeError::TooManyParameters(types.len()).into());
        }
        frontend::write(
            frontend::Parse {
                prepare_name: name,
                sql,
                oids_len: types.len().to_u16(),
                oids: types.iter().copied(),
            },
            &mut self.write_buf,
        );
        self.push(id, Kind::Parse);
        Ok(())
    }

    /// Bind `params` to the statement, requesting every result column in binary.
    pub fn bind(&mut self, id: RequestId, portal: &str, stmt: &str, params: Vec<Parameter>) -> Result<(), Error> {
        self.check_request()?;
        if params.len() > u16::MAX as usize {
            return Err(EncodeError::TooManyParameters(params.len()).into());
        }
        let formats = params.iter().map(Parameter::format).collect::<Vec<_>>();
        frontend::write(
            frontend::Bind {
                portal_name: portal,
                stmt_name: stmt,
                param_formats_len: formats.len().to_u16(),
                param_formats: formats,
                params_len: params.len().to_u16(),
                params_size_hint: params
                    .iter()
                    .fold(0, |acc, p| acc + 4 + p.remaining().to_u32()),
                params: params.into_iter(),
                result_formats_len: 1,
                result_formats: [PgFormat::Binary],
            },
            &mut self.write_buf,
        );
        self.push(id, Kind::Bind);
        Ok(())
    }

    pub fn describe_portal(&mut self, id: RequestId, portal: &str) -> Result<(), Error> {
        self.check_request()?;
        frontend::write(frontend::Describe { kind: b'P', name: portal }, &mut self.write_buf);
        self.push(id, Kind::DescribePortal);
        Ok(())
    }

    pub fn describe_statement(&mut self, id: RequestId, name: &str) -> Result<(), Error> {
        self.check_request()?;
        frontend::write(frontend::Describe { kind: b'S', name }, &mut self.write_buf);
        self.push(id, Kind::DescribeStatement);
        Ok(())
    }

    /// Execute a portal, `max_rows` of zero means no limit.
    pub fn execute(&mut self, id: RequestId, portal: &str, max_rows: u32) -> Result<(), Error> {
        self.check_request()?;
        frontend::write(frontend::Execute { portal_name: portal, max_row: max_rows }, &mut self.write_buf);
        self.push(id, Kind::Execute);
        Ok(())
    }

    pub fn close_statement(&mut self, id: RequestId, name: &str) -> Result<(), Error> {
        self.check_request()?;
        frontend::write(frontend::Close { variant: b'S', name }, &mut self.write_buf);
        self.push(id, Kind::Close);
        Ok(())
    }

    /// Close the request group, server responds with `ReadyForQuery`.
    pub fn sync(&mut self, id: RequestId) -> Result<(), Error> {
        self.check_request()?;
        frontend::write(frontend::Sync, &mut self.write_buf);
        self.push(id, Kind::Sync);
        Ok(())
    }

    /// Ask the server to deliver pending output without closing the group.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.check_request()?;
        frontend::write(frontend::Flush, &mut self.write_buf);
        Ok(())
    }

    fn check_copy_in(&self) -> Result<bool, Error> {
        match self.state() {
            State::Copy(CopyDirection::In) => Ok(true),
            // the server already rejected the copy, the error is pending
            State::Draining => Ok(false),
            State::Closed => Err(Closed.into()),
            _ => Err(Error::invalid_state("not in COPY FROM STDIN")),
        }
    }

    pub fn copy_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.check_copy_in()? {
            frontend::write(frontend::CopyData { data }, &mut self.write_buf);
        }
        Ok(())
    }

    pub fn copy_done(&mut self) -> Result<(), Error> {
        if self.check_copy_in()? {
            frontend::write(frontend::CopyDone, &mut self.write_buf);
            self.copy = None;
            self.resync();
        }
        Ok(())
    }

    /// Abort COPY FROM STDIN, server responds with an error.
    pub fn copy_fail(&mut self, message: &str) -> Result<(), Error> {
        if self.check_copy_in()? {
            frontend::write(frontend::CopyFail { message }, &mut self.write_buf);
            self.copy = None;
            self.resync();
        }
        Ok(())
    }

    fn resync(&mut self) {
        if !std::mem::take(&mut self.copy_resync) {
            return;
        }
        frontend::write(frontend::Sync, &mut self.write_buf);
        if !self.pending.iter().any(|p| p.kind == Kind::Sync) {
            if let Some(head) = self.pending.front().copied() {
                self.push(head.id, Kind::Sync);
            }
        }
    }

    /// Write `Terminate` and close the session.
    pub fn terminate(&mut self) {
        if self.closed {
            return;
        }
        self.fail();
        frontend::write(frontend::Terminate, &mut self.write_buf);
    }

    // ===== routing =====

    fn handle(&mut self, msg: BackendMessage) -> Result<(), Error> {
        let msg = match msg {
            BackendMessage::NotificationResponse(n) => {
                self.notify(AsyncMessage::Notification(n));
                return Ok(());
            }
            BackendMessage::NoticeResponse(n) => {
                report!(warn, "{}", n.fields);
                self.notify(AsyncMessage::Notice(n.fields));
                return Ok(());
            }
            BackendMessage::ParameterStatus(p) => {
                self.parameters.insert(p.name.as_str().to_owned(), p.value.clone());
                self.notify(AsyncMessage::ParameterStatus { name: p.name, value: p.value });
                return Ok(());
            }
            msg => msg,
        };

        if !self.authenticated || self.pending.front().is_some_and(|p| p.kind == Kind::Startup) {
            return self.handle_startup(msg);
        }
        if self.draining {
            return self.handle_draining(msg);
        }
        self.handle_request(msg)
    }

    fn notify(&mut self, msg: AsyncMessage) {
        if let Some(observer) = &self.observer {
            if observer.send(msg).is_err() {
                self.observer = None;
            }
        }
    }

    fn handle_request(&mut self, msg: BackendMessage) -> Result<(), Error> {
        use BackendMessage as B;

        let Some(head) = self.pending.front().copied() else {
            return Err(ProtocolError::unexpected_phase(msg.msgtype(), "idle").into());
        };
        let id = head.id;
        let copy_out = self.copy == Some(CopyDirection::Out);

        let event = match (head.kind, msg) {
            (_, B::ErrorResponse(e)) => return self.handle_error(head, e.fields),

            (Kind::Simple | Kind::Execute, B::CopyInResponse(c)) => {
                self.copy = Some(CopyDirection::In);
                self.copy_resync = head.kind == Kind::Execute;
                Event::CopyIn { id, response: c.response }
            }
            (Kind::Simple | Kind::Execute, B::CopyOutResponse(c)) => {
                self.copy = Some(CopyDirection::Out);
                Event::CopyOut { id, response: c.response }
            }
            (_, B::CopyBothResponse(_)) => {
                return Err(ProtocolError::malformed("COPY BOTH is not supported").into());
            }
            (Kind::Simple | Kind::Execute, B::CopyData(c)) if copy_out => Event::CopyData { id, data: c.data },
            (Kind::Simple | Kind::Execute, B::CopyDone(_)) if copy_out => {
                self.copy = None;
                Event::CopyDone { id }
            }

            (Kind::Simple, B::RowDescription(r)) => {
                self.row_width = Some(r.columns.len());
                Event::RowDescription { id, columns: r.columns.into() }
            }
            (Kind::Simple | Kind::Execute, B::DataRow(r)) => {
                if let Some(width) = self.row_width.filter(|w| *w != r.values.len()) {
                    return Err(ProtocolError::malformed(format!(
                        "DataRow has {} values, RowDescription has {width} columns",
                        r.values.len(),
                    ))
                    .into());
                }
                Event::DataRow { id, values: r.values }
            }
            (Kind::Simple, B::CommandComplete(c)) => {
                self.copy = None;
                Event::CommandComplete { id, tag: c.tag }
            }
            (Kind::Simple, B::EmptyQueryResponse(_)) => Event::EmptyQuery { id },
            (Kind::Simple | Kind::Sync, B::ReadyForQuery(r)) => {
                self.pending.pop_front();
                self.status = r.status;
                Event::Ready { id, status: r.status }
            }

            (Kind::Parse, B::ParseComplete(_)) => {
                self.pending.pop_front();
                Event::ParseComplete { id }
            }
            (Kind::Bind, B::BindComplete(_)) => {
                self.pending.pop_front();
                Event::BindComplete { id }
            }
            (Kind::DescribeStatement, B::ParameterDescription(p)) => Event::ParameterDescription { id, types: p.oids },
            (Kind::DescribePortal | Kind::DescribeStatement, B::RowDescription(r)) => {
                self.pending.pop_front();
                self.row_width = Some(r.columns.len());
                Event::RowDescription { id, columns: r.columns.into() }
            }
            (Kind::DescribePortal | Kind::DescribeStatement, B::NoData(_)) => {
                self.pending.pop_front();
                self.row_width = None;
                Event::NoData { id }
            }
            (Kind::Execute, B::CommandComplete(c)) => {
                self.pending.pop_front();
                self.copy = None;
                Event::CommandComplete { id, tag: c.tag }
            }
            (Kind::Execute, B::EmptyQueryResponse(_)) => {
                self.pending.pop_front();
                Event::EmptyQuery { id }
            }
            (Kind::Execute, B::PortalSuspended(_)) => {
                self.pending.pop_front();
                Event::PortalSuspended { id }
            }
            (Kind::Close, B::CloseComplete(_)) => {
                self.pending.pop_front();
                Event::CloseComplete { id }
            }

            (kind, msg) => {
                verbose!(?kind, "unexpected message");
                return Err(ProtocolError::unexpected_phase(msg.msgtype(), "request").into());
            }
        };

        self.events.push_back(event);
        Ok(())
    }

    /// Route `ErrorResponse` to the head request and skip the rest of its group.
    fn handle_error(&mut self, head: Pending, fields: DatabaseError) -> Result<(), Error> {
        let fatal = fields.is_fatal();
        verbose!(id = ?head.id, code = fields.code(), "error response");

        self.copy = None;
        let resync = std::mem::take(&mut self.copy_resync);
        self.events.push_back(Event::Error { id: head.id, error: fields.into() });

        if !matches!(head.kind, Kind::Simple | Kind::Sync) {
            let mut last = head.id;
            while let Some(p) = self.pending.front().copied() {
                if p.kind == Kind::Sync {
                    break;
                }
                self.pending.pop_front();
                if p.id != last {
                    self.events.push_back(Event::Aborted { id: p.id });
                    last = p.id;
                }
            }

            // the server discards messages until a Sync
            if self.pending.is_empty() {
                frontend::write(frontend::Sync, &mut self.write_buf);
                self.push(head.id, Kind::Sync);
            } else if resync {
                frontend::write(frontend::Sync, &mut self.write_buf);
            }
        }

        if fatal {
            report!(error, "server terminated the session");
            self.fail();
        } else {
            self.draining = true;
        }

        Ok(())
    }

    fn handle_draining(&mut self, msg: BackendMessage) -> Result<(), Error> {
        let BackendMessage::ReadyForQuery(r) = msg else {
            verbose!(msgtype = BackendMessage::message_name(msg.msgtype()), "discard");
            return Ok(());
        };

        match self.pending.pop_front() {
            Some(Pending { id, kind: Kind::Simple | Kind::Sync }) => {
                self.draining = false;
                self.status = r.status;
                self.events.push_back(Event::Ready { id, status: r.status });
                Ok(())
            }
            _ => Err(ProtocolError::unexpected_phase(ReadyForQuery::MSGTYPE, "draining").into()),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .field("events", &self.events.len())
            .field("status", &self.status)
            .finish()
    }
}
