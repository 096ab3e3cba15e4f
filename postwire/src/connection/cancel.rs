use bytes::BytesMut;
use std::{future::poll_fn, time::Duration};

use super::connect_socket;
use crate::{
    Result,
    common::{ByteStr, verbose},
    io,
    postgres::frontend,
    session::BackendKey,
};

/// Request cancellation of the query running on a connection.
///
/// Obtained from [`Connection::cancel_token`][super::Connection::cancel_token],
/// the token can be sent to another task while the connection is busy.
#[derive(Debug, Clone)]
pub struct CancelToken {
    pub(crate) host: ByteStr,
    pub(crate) port: u16,
    pub(crate) socket: Option<ByteStr>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) key: BackendKey,
}

impl CancelToken {
    pub fn backend_key(&self) -> BackendKey {
        self.key
    }

    /// Open a new connection and send `CancelRequest`.
    ///
    /// The server does not reply, success only means the request was
    /// delivered. The cancelled query fails with `57014 query_canceled`.
    pub async fn cancel(&self) -> Result<()> {
        let mut socket = connect_socket(&self.host, self.port, self.socket.as_ref(), self.connect_timeout).await?;

        let mut buf = BytesMut::with_capacity(16);
        frontend::CancelRequest {
            process_id: self.key.process_id,
            secret_key: self.key.secret_key,
        }
        .write(&mut buf);

        verbose!(pid = self.key.process_id, "cancel request");
        poll_fn(|cx| io::poll_write_all(&mut socket, &mut buf, cx)).await?;

        // wait for the server to close the connection
        let mut sink = BytesMut::with_capacity(64);
        while poll_fn(|cx| io::poll_read(&mut socket, &mut sink, cx)).await? != 0 {
            sink.clear();
        }

        Ok(())
    }
}
