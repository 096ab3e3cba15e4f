//! Transport layer.
//!
//! The driver speak the protocol over any byte stream. [`Socket`] is the
//! transport connected by [`Connection::connect`][crate::Connection::connect],
//! while [`Connection::connect_stream`][crate::Connection::connect_stream] accept
//! a caller provided stream, such as one already upgraded to TLS after
//! [`request_tls`].
use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::postgres::frontend;

mod socket;

pub use socket::{AsyncStream, Socket};

/// Send `SSLRequest` and read the single byte answer.
///
/// Returns `true` when server is willing to perform TLS handshake, in which
/// case the caller should upgrade `stream` before passing it to
/// [`Connection::connect_stream`][crate::Connection::connect_stream].
pub async fn request_tls<S>(stream: &mut S) -> io::Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(8);
    frontend::SslRequest.write(&mut buf);
    std::future::poll_fn(|cx| crate::io::poll_write_all(stream, &mut buf, cx)).await?;

    let mut answer = BytesMut::with_capacity(1);
    while answer.is_empty() {
        let n = std::future::poll_fn(|cx| crate::io::poll_read(stream, &mut answer, cx)).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }

    match answer.get_u8() {
        b'S' => Ok(true),
        b'N' => Ok(false),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected SSLRequest answer: {:?}", other as char),
        )),
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn tls_declined() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let task = tokio::spawn(async move {
            let mut request = [0u8; 8];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..4], &8i32.to_be_bytes());
            assert_eq!(&request[4..], &80877103i32.to_be_bytes());
            server.write_all(b"N").await.unwrap();
        });

        assert!(!super::request_tls(&mut client).await.unwrap());
        task.await.unwrap();
    }
}
