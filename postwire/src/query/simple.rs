use futures_core::Stream;
use std::{
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use crate::{
    Error, Result, Row,
    common::{ByteStr, verbose},
    postgres::{ColumnDescriptor, backend},
    session::{Event, RequestId},
    sql::Sql,
    transport::{PgTransport, PgTransportExt},
};

const COPY_REJECTED: &str = "COPY FROM STDIN requires `copy_in`";

/// Run sql with the simple query protocol.
///
/// The sql may contain multiple statements separated by `;`, which run in
/// an implicit transaction unless the sql controls it. Parameters are not
/// supported, and rows are received in text format.
///
/// ```no_run
/// # async fn app(mut conn: postwire::Connection) -> postwire::Result<()> {
/// let results = postwire::simple("SELECT 1; SELECT 2", &mut conn).results().await?;
/// assert_eq!(results.len(), 2);
/// # Ok(())
/// # }
/// ```
pub fn simple<SQL, IO>(sql: SQL, io: IO) -> SimpleQuery<SQL, IO> {
    SimpleQuery {
        sql,
        io,
        phase: Phase::Drain,
        columns: None,
        error: None,
    }
}

/// A message of a simple query result.
#[derive(Debug)]
pub enum SimpleMessage {
    /// Start of the rows of a statement.
    RowDescription(Arc<[ColumnDescriptor]>),
    Row(Row),
    /// A statement is completed.
    CommandComplete {
        tag: ByteStr,
        rows_affected: u64,
    },
    /// A statement is empty.
    EmptyQuery,
}

/// Result of a single statement.
#[derive(Debug, Default)]
pub struct QueryResult {
    /// Columns, [`None`] if the statement returns no row.
    pub columns: Option<Arc<[ColumnDescriptor]>>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

/// Stream of [`SimpleMessage`], see [`simple`].
///
/// A server error is reported after the server finish the query, when the
/// session is ready again. Statements before the failing one still deliver
/// their messages.
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct SimpleQuery<SQL, IO> {
    sql: SQL,
    io: IO,
    phase: Phase,
    columns: Option<Arc<[ColumnDescriptor]>>,
    error: Option<Error>,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Drain,
    Send,
    Recv(RequestId),
    Complete,
}

impl<SQL, IO> SimpleQuery<SQL, IO> {
    /// Collect every statement result.
    pub fn results(self) -> Results<SQL, IO> {
        Results { query: self, results: vec![], current: None }
    }
}

impl<SQL, IO> Stream for SimpleQuery<SQL, IO>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
{
    type Item = Result<SimpleMessage>;

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
                    let session = me.io.session();
                    let id = session.next_id();
                    if let Err(err) = session.simple_query(id, me.sql.sql()) {
                        me.phase = Phase::Complete;
                        return Poll::Ready(Some(Err(err)));
                    }
                    me.phase = Phase::Recv(id);
                    continue;
                }
                Phase::Recv(id) => id,
                Phase::Complete => return Poll::Ready(None),
            };

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

            let message = match event {
                Event::RowDescription { columns, .. } => {
                    me.columns = Some(columns.clone());
                    SimpleMessage::RowDescription(columns)
                }
                Event::DataRow { values, .. } => {
                    let Some(columns) = me.columns.clone() else {
                        return Poll::Ready(Some(Err(Error::invalid_state("DataRow without RowDescription"))));
                    };
                    match Row::new(columns, values, me.io.registry().clone()) {
                        Ok(row) => SimpleMessage::Row(row),
                        Err(err) => return Poll::Ready(Some(Err(err.into()))),
                    }
                }
                Event::CommandComplete { tag, .. } => {
                    me.columns = None;
                    let rows_affected = backend::rows_affected(&tag);
                    SimpleMessage::CommandComplete { tag, rows_affected }
                }
                Event::EmptyQuery { .. } => SimpleMessage::EmptyQuery,
                Event::CopyIn { .. } => {
                    me.error.get_or_insert_with(|| Error::invalid_state(COPY_REJECTED));
                    if let Err(err) = me.io.session().copy_fail(COPY_REJECTED) {
                        me.phase = Phase::Complete;
                        return Poll::Ready(Some(Err(err)));
                    }
                    continue;
                }
                Event::Error { error, .. } => {
                    me.error.get_or_insert(error);
                    continue;
                }
                Event::Ready { .. } => {
                    me.phase = Phase::Complete;
                    return Poll::Ready(me.error.take().map(Err));
                }
                event => {
                    // COPY TO STDOUT data is not delivered here
                    verbose!(?event, "discard");
                    let _ = event;
                    continue;
                }
            };

            return Poll::Ready(Some(Ok(message)));
        }
    }
}

/// Returned [`results`][SimpleQuery::results] future.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Results<SQL, IO> {
    query: SimpleQuery<SQL, IO>,
    results: Vec<QueryResult>,
    current: Option<QueryResult>,
}

impl<SQL, IO> Future for Results<SQL, IO>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
{
    type Output = Result<Vec<QueryResult>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(message) = ready!(Pin::new(&mut me.query).poll_next(cx)?) {
            match message {
                SimpleMessage::RowDescription(columns) => {
                    me.current = Some(QueryResult { columns: Some(columns), ..Default::default() });
                }
                SimpleMessage::Row(row) => {
                    me.current.get_or_insert_with(QueryResult::default).rows.push(row);
                }
                SimpleMessage::CommandComplete { rows_affected, .. } => {
                    let mut result = me.current.take().unwrap_or_default();
                    result.rows_affected = rows_affected;
                    me.results.push(result);
                }
                SimpleMessage::EmptyQuery => {
                    me.results.push(QueryResult::default());
                }
            }
        }

        Poll::Ready(Ok(mem::take(&mut me.results)))
    }
}

/// Run sql ignoring its rows, fail on the first server error.
pub(crate) async fn simple_command<IO: PgTransport>(io: IO, sql: &str) -> Result<()> {
    let mut query = simple(sql, io);
    while let Some(message) = std::future::poll_fn(|cx| Pin::new(&mut query).poll_next(cx)).await {
        message?;
    }
    Ok(())
}
