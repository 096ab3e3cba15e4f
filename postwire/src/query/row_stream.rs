use futures_core::Stream;
use std::{
    fmt,
    marker::PhantomData,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use super::encode_params;
use crate::{
    Error, Result,
    common::{span, verbose},
    encode::Argument,
    error::{Aborted, EmptyQuery},
    postgres::{ColumnDescriptor, backend},
    row::{FromRow, Row},
    session::{Event, RequestId},
    sql::Sql,
    transport::{PgTransport, PgTransportExt},
};

const COPY_REJECTED: &str = "COPY FROM STDIN requires `copy_in`";

/// Stream of rows returned by [`Query::fetch`][super::Query::fetch].
///
/// Messages are `Parse`, `Bind`, `Describe`, and `Execute`, followed by
/// `Sync`. With a fetch size, `Sync` is delayed and the next batch is only
/// requested once the stream is polled past the current one.
///
/// Dropping the stream midway is allowed, its remaining responses are
/// discarded before the next request.
#[must_use = "streams do nothing unless polled"]
pub struct RowStream<SQL, IO: PgTransport, R> {
    sql: SQL,
    io: IO,
    args: Vec<Argument>,
    limit: u32,
    fetch_size: u32,
    phase: Phase,
    columns: Option<Arc<[ColumnDescriptor]>>,
    synced: bool,
    empty: bool,
    rows_affected: u64,
    error: Option<Error>,
    _p: PhantomData<fn() -> R>,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Drain,
    Send,
    Recv(RequestId),
    Complete,
}

impl<SQL, IO: PgTransport, R> RowStream<SQL, IO, R> {
    /// `limit` of zero means no limit, `fetch_size` of zero fetch all rows at once.
    pub(crate) fn new(sql: SQL, io: IO, args: Vec<Argument>, limit: u32, fetch_size: u32) -> Self {
        Self {
            sql,
            io,
            args,
            limit,
            fetch_size,
            phase: Phase::Drain,
            columns: None,
            synced: false,
            empty: false,
            rows_affected: 0,
            error: None,
            _p: PhantomData,
        }
    }

    /// Number of rows affected, available once the stream is exhausted.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Result columns, available after the first row.
    pub fn columns(&self) -> Option<&[ColumnDescriptor]> {
        self.columns.as_deref()
    }
}

impl<SQL: Sql, IO: PgTransport, R> RowStream<SQL, IO, R> {
    fn send(&mut self) -> Result<RequestId> {
        let prepared = self.sql.prepared();
        let params = encode_params(self.io.registry(), &self.args, prepared)?;
        self.args.clear();

        let max_rows = match self.limit {
            0 => self.fetch_size,
            limit => limit,
        };
        self.synced = self.limit != 0 || self.fetch_size == 0;

        let session = self.io.session();
        let id = session.next_id();

        let stmt = match prepared {
            Some(prepared) => prepared.name(),
            None => {
                let oids = params.iter().map(|p| p.oid()).collect::<Vec<_>>();
                session.parse(id, "", self.sql.sql(), &oids)?;
                ""
            }
        };
        session.bind(id, "", stmt, params)?;
        session.describe_portal(id, "")?;
        session.execute(id, "", max_rows)?;
        match self.synced {
            true => session.sync(id)?,
            false => session.flush()?,
        }

        verbose!(?id, max_rows, synced = self.synced, "query sent");
        Ok(id)
    }
}

impl<SQL, IO, R> Stream for RowStream<SQL, IO, R>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
    R: FromRow,
{
    type Item = Result<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        loop {
            let id = match me.phase {
                Phase::Drain => {
                    if let Err(err) = ready!(me.io.poll_drain(cx)) {
                        me.phase = Phase::Complete;
                        return Poll::Ready(Some(Err(err)));
                    }
                    me.phase = Phase::Send;
                    continue;
                }
                Phase::Send => {
                    match me.send() {
                        Ok(id) => me.phase = Phase::Recv(id),
                        Err(err) => {
                            me.phase = Phase::Complete;
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                    continue;
                }
                Phase::Recv(id) => id,
                Phase::Complete => return Poll::Ready(None),
            };

            span!("recv", ?id);

            let event = match ready!(me.io.poll_event(cx)) {
                Ok(event) => event,
                Err(err) => {
                    me.phase = Phase::Complete;
                    return Poll::Ready(Some(Err(me.error.take().unwrap_or(err))));
                }
            };

            if event.id() != id {
                verbose!(?event, "discard");
                continue;
            }

            match event {
                Event::ParseComplete { .. } | Event::BindComplete { .. } | Event::NoData { .. } => {}
                Event::RowDescription { columns, .. } => me.columns = Some(columns),
                Event::DataRow { values, .. } => {
                    let Some(columns) = me.columns.clone() else {
                        return Poll::Ready(Some(Err(Error::invalid_state("DataRow without RowDescription"))));
                    };
                    let row = match Row::new(columns, values, me.io.registry().clone()) {
                        Ok(row) => row,
                        Err(err) => return Poll::Ready(Some(Err(err.into()))),
                    };
                    return Poll::Ready(Some(R::from_row(row).map_err(Into::into)));
                }
                Event::CommandComplete { tag, .. } => {
                    me.rows_affected = backend::rows_affected(&tag);
                    me.sync(id);
                }
                Event::EmptyQuery { .. } => {
                    me.empty = true;
                    me.sync(id);
                }
                Event::PortalSuspended { .. } => {
                    if !me.synced {
                        // next batch, requested only when the previous one is consumed
                        let session = me.io.session();
                        if let Err(err) = session.execute(id, "", me.fetch_size).and_then(|_| session.flush()) {
                            me.phase = Phase::Complete;
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                }
                Event::CopyIn { .. } => {
                    me.error.get_or_insert_with(|| Error::invalid_state(COPY_REJECTED));
                    if let Err(err) = me.io.session().copy_fail(COPY_REJECTED) {
                        me.phase = Phase::Complete;
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                Event::CopyOut { .. } | Event::CopyData { .. } | Event::CopyDone { .. } => {}
                Event::Error { error, .. } => {
                    me.synced = true;
                    me.error.get_or_insert(error);
                }
                Event::Aborted { .. } => {
                    me.error.get_or_insert_with(|| Aborted.into());
                }
                Event::Ready { .. } => {
                    me.phase = Phase::Complete;
                    if let Some(err) = me.error.take() {
                        return Poll::Ready(Some(Err(err)));
                    }
                    if me.empty {
                        return Poll::Ready(Some(Err(EmptyQuery.into())));
                    }
                    return Poll::Ready(None);
                }
                event @ (Event::ParameterDescription { .. } | Event::CloseComplete { .. }) => {
                    verbose!(?event, "discard");
                    let _ = event;
                }
            }
        }
    }
}

impl<SQL, IO: PgTransport, R> RowStream<SQL, IO, R> {
    /// Close the group of a delayed `Sync`.
    fn sync(&mut self, id: RequestId) {
        if !self.synced {
            self.synced = true;
            if let Err(err) = self.io.session().sync(id) {
                self.error.get_or_insert(err);
            }
        }
    }
}

impl<SQL, IO: PgTransport, R> Drop for RowStream<SQL, IO, R> {
    fn drop(&mut self) {
        if let Phase::Recv(id) = self.phase {
            // the portal is left suspended, close the group so the next request can drain it
            self.sync(id);
        }
    }
}

impl<SQL: fmt::Debug, IO: PgTransport, R> fmt::Debug for RowStream<SQL, IO, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("sql", &self.sql)
            .field("phase", &self.phase)
            .field("limit", &self.limit)
            .field("fetch_size", &self.fetch_size)
            .field("synced", &self.synced)
            .finish()
    }
}
