//! Postgres connection.
use std::{
    future::poll_fn,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Duration,
};
use tokio::{io::AsyncWrite, time::Sleep};

use crate::{
    Error, Result,
    codec::CodecRegistry,
    common::{ByteStr, report, verbose},
    error::{Closed, Timeout},
    io,
    net::{AsyncStream, Socket},
    postgres::TransactionStatus,
    session::{BackendKey, Event, Session},
    transport::{PgTransport, PgTransportExt},
};

mod config;
mod cancel;
mod subscription;

pub use config::{Config, ParseError};
pub use cancel::CancelToken;
pub use subscription::Subscription;

const READ_CHUNK: usize = 4 * 1024;

/// A single postgres connection.
///
/// Requests are sent through `&mut Connection`, see [`query`][crate::query]
/// and friends.
pub struct Connection {
    socket: Socket,
    session: Session,
    registry: Arc<CodecRegistry>,
    recv_timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
    cancel: CancelTarget,
}

struct CancelTarget {
    host: ByteStr,
    port: u16,
    socket: Option<ByteStr>,
    connect_timeout: Option<Duration>,
}

impl Connection {
    /// Connect using a url, see [`Config::parse`].
    pub async fn connect(url: &str) -> Result<Connection> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Connect using environment variables, see [`Config::from_env`].
    pub async fn connect_env() -> Result<Connection> {
        Self::connect_with(Config::from_env()).await
    }

    pub async fn connect_with(config: Config) -> Result<Connection> {
        let socket = connect_socket(
            &config.host,
            config.port,
            config.socket.as_ref(),
            config.connect_timeout,
        )
        .await?;
        Self::startup(socket, config).await
    }

    /// Run the startup over an already connected stream.
    ///
    /// Used for transports the driver does not connect itself, such as a
    /// stream upgraded to TLS after [`request_tls`][crate::net::request_tls].
    pub async fn connect_stream<S: AsyncStream>(stream: S, config: Config) -> Result<Connection> {
        Self::startup(Socket::from_stream(stream), config).await
    }

    async fn startup(socket: Socket, config: Config) -> Result<Connection> {
        let mut session = Session::new(&config.startup());
        session.set_max_frame(config.max_frame_size);

        let mut registry = CodecRegistry::new();
        registry.set_unknown_types(config.unknown_types);

        let mut conn = Connection {
            socket,
            session,
            registry: Arc::new(registry),
            recv_timeout: config.recv_timeout,
            deadline: None,
            cancel: CancelTarget {
                host: config.host.clone(),
                port: config.port,
                socket: config.socket.clone(),
                connect_timeout: config.connect_timeout,
            },
        };

        let startup = conn.session.startup_id();
        match conn.event().await? {
            Event::Ready { id, .. } if id == startup => {}
            event => return Err(Error::invalid_state(format!("unexpected {event:?} during startup"))),
        }
        report!(debug, "connected to {}:{} as {}", config.host, config.port, config.user);

        // registrars may query the server, they see the builtin registry
        if !config.registrars.is_empty() {
            let mut registry = CodecRegistry::clone(&conn.registry);
            for registrar in &config.registrars {
                registrar.register(&mut conn, &mut registry).await?;
            }
            conn.registry = Arc::new(registry);
        }

        Ok(conn)
    }

    /// Receive asynchronous messages, replacing previous subscription.
    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.session.set_observer(tx);
        Subscription { rx }
    }

    /// Wait until the server sends a message while no request is pending.
    ///
    /// This drives the connection so [`Subscription`] receive notifications
    /// without running a query. Receive timeout does not apply.
    pub async fn wait_async_message(&mut self) -> Result<()> {
        self.drain().await?;
        poll_fn(|cx| {
            ready!(self.poll_flush(cx))?;
            if self.session.is_closed() {
                return Poll::Ready(Err(Closed.into()));
            }
            self.session.read_buf().reserve(READ_CHUNK);
            match ready!(io::poll_read(&mut self.socket, self.session.read_buf(), cx)) {
                Ok(0) => {
                    self.session.fail();
                    Poll::Ready(Err(Error::from(Closed).context("server closed the connection")))
                }
                Ok(_) => Poll::Ready(self.session.process()),
                Err(err) => {
                    self.session.fail();
                    Poll::Ready(Err(err.into()))
                }
            }
        })
        .await?;
        // a notification may arrive inside an unrelated response
        self.drain().await
    }

    /// Token to cancel the running query from another task.
    ///
    /// Returns `None` if the server did not send `BackendKeyData`.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        let key = self.session.backend_key()?;
        Some(CancelToken {
            host: self.cancel.host.clone(),
            port: self.cancel.port,
            socket: self.cancel.socket.clone(),
            connect_timeout: self.cancel.connect_timeout,
            key,
        })
    }

    pub fn backend_key(&self) -> Option<BackendKey> {
        self.session.backend_key()
    }

    /// Server run-time parameter, such as `server_version`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.session.parameter(name)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.transaction_status()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Send `Terminate` and close the transport.
    pub async fn close(mut self) -> Result<()> {
        self.session.terminate();
        self.flush().await?;
        poll_fn(|cx| Pin::new(&mut self.socket).poll_shutdown(cx)).await?;
        Ok(())
    }

    fn poll_read(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        self.session.read_buf().reserve(READ_CHUNK);

        match io::poll_read(&mut self.socket, self.session.read_buf(), cx) {
            Poll::Ready(Ok(0)) => {
                self.deadline = None;
                self.session.fail();
                Poll::Ready(Err(Error::from(Closed).context("server closed the connection")))
            }
            Poll::Ready(Ok(_n)) => {
                verbose!(bytes = _n, "read");
                self.deadline = None;
                Poll::Ready(self.session.process())
            }
            Poll::Ready(Err(err)) => {
                self.session.fail();
                Poll::Ready(Err(err.into()))
            }
            Poll::Pending => {
                let Some(timeout) = self.recv_timeout else {
                    return Poll::Pending;
                };
                let deadline = self
                    .deadline
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                ready!(deadline.as_mut().poll(cx));

                report!(warn, "no response within {timeout:?}, closing connection");
                self.deadline = None;
                self.session.fail();
                let _ = Pin::new(&mut self.socket).poll_shutdown(cx);
                Poll::Ready(Err(Timeout.into()))
            }
        }
    }
}

impl PgTransport for Connection {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        if self.session.has_pending_write() {
            // new request, previous wait is irrelevant
            self.deadline = None;
            if let Err(err) = ready!(io::poll_write_all(&mut self.socket, self.session.write_buf(), cx)) {
                self.session.fail();
                return Poll::Ready(Err(err.into()));
            }
        }
        Pin::new(&mut self.socket).poll_flush(cx).map_err(Into::into)
    }

    fn poll_event(&mut self, cx: &mut Context) -> Poll<Result<Event>> {
        loop {
            if let Some(event) = self.session.next_event() {
                return Poll::Ready(Ok(event));
            }

            ready!(self.poll_flush(cx))?;

            if self.session.is_closed() {
                return Poll::Ready(Err(Closed.into()));
            }
            if self.session.is_idle() {
                return Poll::Ready(Err(Error::invalid_state("no request is waiting for response")));
            }

            ready!(self.poll_read(cx))?;
        }
    }

    fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .field("codecs", &self.registry.len())
            .finish()
    }
}

pub(crate) async fn connect_socket(
    host: &str,
    port: u16,
    socket: Option<&ByteStr>,
    timeout: Option<Duration>,
) -> Result<Socket> {
    let connect = async {
        match socket {
            Some(path) if path.contains(".s.PGSQL.") => Socket::connect_socket(path).await,
            Some(dir) => Socket::connect_socket(&format!("{dir}/.s.PGSQL.{port}")).await,
            None => Socket::connect_tcp(host, port).await,
        }
    };

    let socket = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, connect).await {
            Ok(socket) => socket?,
            Err(_) => return Err(Error::from(Timeout).context("connect")),
        },
        None => connect.await?,
    };

    Ok(socket)
}
