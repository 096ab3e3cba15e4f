use futures_core::Stream;
use std::{
    mem,
    pin::Pin,
    task::{Context, Poll, ready},
};

use super::RowStream;
use crate::{Result, row::FromRow, sql::Sql, transport::PgTransport};

/// Returned [`fetch_all`][super::Query::fetch_all] future.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchAll<SQL, IO: PgTransport, R> {
    fetch: RowStream<SQL, IO, R>,
    output: Vec<R>,
}

// `output` is never pinned
impl<SQL: Unpin, IO: PgTransport, R> Unpin for FetchAll<SQL, IO, R> { }

impl<SQL, IO: PgTransport, R> FetchAll<SQL, IO, R> {
    pub(crate) fn new(fetch: RowStream<SQL, IO, R>) -> Self {
        Self { fetch, output: vec![] }
    }
}

impl<SQL, IO, R> Future for FetchAll<SQL, IO, R>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
    R: FromRow,
{
    type Output = Result<Vec<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(r) = ready!(Pin::new(&mut me.fetch).poll_next(cx)?) {
            me.output.push(r);
        }

        Poll::Ready(Ok(mem::take(&mut me.output)))
    }
}

/// Returned [`execute`][super::Query::execute] future, resolves to the number of rows affected.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Execute<SQL, IO: PgTransport> {
    fetch: RowStream<SQL, IO, ()>,
}

impl<SQL, IO: PgTransport> Execute<SQL, IO> {
    pub(crate) fn new(fetch: RowStream<SQL, IO, ()>) -> Self {
        Self { fetch }
    }
}

impl<SQL, IO> Future for Execute<SQL, IO>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
{
    type Output = Result<u64>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while ready!(Pin::new(&mut me.fetch).poll_next(cx)?).is_some() { }

        Poll::Ready(Ok(me.fetch.rows_affected()))
    }
}
