use bytes::Bytes;
use futures_core::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use crate::{
    Error, Result,
    common::{report, verbose},
    postgres::backend::{self, CopyResponse},
    session::{Event, RequestId},
    sql::Sql,
    transport::{PgTransport, PgTransportExt},
};

/// Buffered `CopyData` is flushed past this size.
const FLUSH_THRESHOLD: usize = 64 * 1024;

/// Start `COPY ... FROM STDIN`.
///
/// ```no_run
/// # async fn app(mut conn: postwire::Connection) -> postwire::Result<()> {
/// let mut copy = postwire::copy_in("COPY post(id, name) FROM STDIN", &mut conn).await?;
/// copy.send("1\tfoo\n").await?;
/// copy.send("2\tbar\n").await?;
/// let rows = copy.finish().await?;
/// # Ok(())
/// # }
/// ```
pub async fn copy_in<SQL: Sql, IO: PgTransport>(sql: SQL, mut io: IO) -> Result<CopyIn<IO>> {
    io.drain().await?;

    let session = io.session();
    let id = session.next_id();
    session.simple_query(id, sql.sql())?;

    let mut error = None;
    loop {
        let event = io.event().await?;
        match event {
            Event::CopyIn { response, .. } => {
                return Ok(CopyIn { io, id, response, done: false });
            }
            Event::Error { error: e, .. } => {
                error.get_or_insert(e);
            }
            Event::Ready { id: ready, .. } if ready == id => {
                return Err(error.unwrap_or_else(|| Error::invalid_state("statement is not COPY FROM STDIN")));
            }
            event => {
                verbose!(?event, "discard");
                let _ = event;
            }
        }
    }
}

/// Start `COPY ... TO STDOUT`, the returned stream yields `CopyData` payloads.
pub async fn copy_out<SQL: Sql, IO: PgTransport>(sql: SQL, mut io: IO) -> Result<CopyOut<IO>> {
    io.drain().await?;

    let session = io.session();
    let id = session.next_id();
    session.simple_query(id, sql.sql())?;

    let mut error = None;
    loop {
        let event = io.event().await?;
        match event {
            Event::CopyOut { response, .. } => {
                return Ok(CopyOut { io, id, response, rows_affected: 0, error: None, complete: false });
            }
            Event::Error { error: e, .. } => {
                error.get_or_insert(e);
            }
            Event::Ready { id: ready, .. } if ready == id => {
                return Err(error.unwrap_or_else(|| Error::invalid_state("statement is not COPY TO STDOUT")));
            }
            Event::CopyIn { .. } => {
                io.session().copy_fail("expected COPY TO STDOUT")?;
            }
            event => {
                verbose!(?event, "discard");
                let _ = event;
            }
        }
    }
}

/// An ongoing `COPY FROM STDIN`, see [`copy_in`].
///
/// Dropping it without [`finish`][CopyIn::finish] aborts the copy.
#[derive(Debug)]
pub struct CopyIn<IO: PgTransport> {
    io: IO,
    id: RequestId,
    response: CopyResponse,
    done: bool,
}

impl<IO: PgTransport> CopyIn<IO> {
    /// Format requested by the server.
    pub fn response(&self) -> &CopyResponse {
        &self.response
    }

    /// Send data, which may contains partial rows.
    pub async fn send(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let session = self.io.session();
        session.copy_data(data.as_ref())?;
        if session.write_buf().len() >= FLUSH_THRESHOLD {
            self.io.flush().await?;
        }
        Ok(())
    }

    /// Complete the copy, returning the number of rows copied.
    pub async fn finish(mut self) -> Result<u64> {
        self.done = true;
        self.io.session().copy_done()?;
        self.wait().await
    }

    /// Abort the copy, the server rolls back everything sent.
    pub async fn abort(mut self, message: &str) -> Result<()> {
        self.done = true;
        self.io.session().copy_fail(message)?;
        match self.wait().await {
            // the error caused by `CopyFail` itself
            Err(err) if err.as_database().is_some_and(|e| e.code() == "57014") => Ok(()),
            Err(err) => Err(err),
            Ok(_) => Ok(()),
        }
    }

    async fn wait(&mut self) -> Result<u64> {
        let mut rows = 0;
        let mut error = None;
        loop {
            match self.io.event().await? {
                Event::CommandComplete { tag, .. } => rows = backend::rows_affected(&tag),
                Event::Error { error: e, .. } => {
                    error.get_or_insert(e);
                }
                Event::Ready { id, .. } if id == self.id => break,
                event => {
                    verbose!(?event, "discard");
                    let _ = event;
                }
            }
        }
        match error {
            Some(err) => Err(err),
            None => Ok(rows),
        }
    }
}

impl<IO: PgTransport> Drop for CopyIn<IO> {
    fn drop(&mut self) {
        if !self.done {
            report!(warn, "COPY FROM STDIN dropped without finish, aborting");
            let _ = self.io.session().copy_fail("COPY FROM STDIN aborted by the client");
        }
    }
}

/// Stream of `COPY TO STDOUT` data, see [`copy_out`].
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct CopyOut<IO> {
    io: IO,
    id: RequestId,
    response: CopyResponse,
    rows_affected: u64,
    error: Option<Error>,
    complete: bool,
}

impl<IO> CopyOut<IO> {
    /// Format used by the server.
    pub fn response(&self) -> &CopyResponse {
        &self.response
    }

    /// Number of rows copied, available once the stream is exhausted.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

impl<IO: PgTransport> Stream for CopyOut<IO> {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        while !me.complete {
            let event = match ready!(me.io.poll_event(cx)) {
                Ok(event) => event,
                Err(err) => {
                    me.complete = true;
                    return Poll::Ready(Some(Err(me.error.take().unwrap_or(err))));
                }
            };

            match event {
                Event::CopyData { data, .. } => return Poll::Ready(Some(Ok(data))),
                Event::CommandComplete { tag, .. } => me.rows_affected = backend::rows_affected(&tag),
                Event::Error { error, .. } => {
                    me.error.get_or_insert(error);
                }
                Event::Ready { id, .. } if id == me.id => {
                    me.complete = true;
                    if let Some(err) = me.error.take() {
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                event => {
                    verbose!(?event, "discard");
                    let _ = event;
                }
            }
        }

        Poll::Ready(None)
    }
}
