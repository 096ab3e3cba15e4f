use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any byte stream the driver can run over.
///
/// Blanket implemented, used as trait object by [`Socket`].
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static { }

impl<S> AsyncStream for S where S: AsyncRead + AsyncWrite + Unpin + Send + 'static { }

/// an either `TcpStream`, unix `Socket`, or user provided stream, which implement
/// `AsyncRead` and `AsyncWrite` transparently
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    Stream(Box<dyn AsyncStream>),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = tokio::net::TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    #[cfg(unix)]
    pub async fn connect_socket(path: &str) -> io::Result<Socket> {
        let socket = tokio::net::UnixStream::connect(path).await?;
        Ok(Socket { kind: Kind::Unix(socket) })
    }

    #[cfg(not(unix))]
    pub async fn connect_socket(path: &str) -> io::Result<Socket> {
        let _ = path;
        Err(io::Error::new(io::ErrorKind::Unsupported, "unix socket unsupported on this platform"))
    }

    /// Wrap an already connected stream.
    pub fn from_stream<S: AsyncStream>(stream: S) -> Socket {
        Socket { kind: Kind::Stream(Box::new(stream)) }
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_read(cx, buf),
            Kind::Stream(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write(cx, buf),
            Kind::Stream(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write_vectored(cx, bufs),
            Kind::Stream(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match &self.kind {
            Kind::Tcp(t) => t.is_write_vectored(),
            #[cfg(unix)]
            Kind::Unix(u) => u.is_write_vectored(),
            Kind::Stream(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_flush(cx),
            Kind::Stream(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_shutdown(cx),
            Kind::Stream(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Tcp(tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::Unix(unix) => std::fmt::Debug::fmt(unix, f),
            Kind::Stream(_) => f.write_str("Socket(Stream)"),
        }
    }
}
