//! The [`Transaction`] type.
use std::{
    sync::Arc,
    task::{Context, Poll},
};

use crate::{
    Result,
    codec::CodecRegistry,
    common::report,
    query::simple_command,
    session::{Event, Session},
    transport::PgTransport,
};

/// Begin a transaction.
///
/// See [`Transaction`] for more details.
pub async fn begin<IO: PgTransport>(mut io: IO) -> Result<Transaction<IO>> {
    simple_command(&mut io, "BEGIN").await?;
    Ok(Transaction { io, done: false })
}

/// An RAII implementation of transaction scope.
///
/// To begin a transaction, use [`begin`] function.
///
/// To commit transaction, use [`Transaction::commit`].
///
/// If not commited, when this structure is dropped, `ROLLBACK` is queued and
/// sent with the next request.
///
/// # Example
///
/// ```no_run
/// # async fn test(mut conn: postwire::Connection) -> postwire::Result<()> {
/// let mut tx = postwire::begin(&mut conn).await?;
///
/// postwire::execute("INSERT INTO post(name) VALUES('foo')", &mut tx).await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Transaction<IO: PgTransport> {
    io: IO,
    done: bool,
}

impl<IO: PgTransport> Transaction<IO> {
    /// Commit transaction.
    pub async fn commit(mut self) -> Result<()> {
        self.done = true;
        simple_command(&mut self.io, "COMMIT").await
    }

    /// Rollback transaction.
    pub async fn rollback(mut self) -> Result<()> {
        self.done = true;
        simple_command(&mut self.io, "ROLLBACK").await
    }
}

impl<IO: PgTransport> Drop for Transaction<IO> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let session = self.io.session();
        if session.is_closed() {
            return;
        }
        let id = session.next_id();
        if let Err(_err) = session.simple_query(id, "ROLLBACK") {
            report!(warn, "failed to queue transaction rollback: {_err}");
        }
    }
}

impl<IO: PgTransport> PgTransport for Transaction<IO> {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        IO::poll_flush(&mut self.io, cx)
    }

    fn poll_event(&mut self, cx: &mut Context) -> Poll<Result<Event>> {
        IO::poll_event(&mut self.io, cx)
    }

    fn session(&mut self) -> &mut Session {
        IO::session(&mut self.io)
    }

    fn registry(&self) -> &Arc<CodecRegistry> {
        IO::registry(&self.io)
    }
}
