use futures_core::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use super::RowStream;
use crate::{Result, row::{FromRow, RowNotFound}, sql::Sql, transport::PgTransport};

/// Returned [`fetch_one`][super::Query::fetch_one] future.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchOne<SQL, IO: PgTransport, R> {
    inner: FetchOptional<SQL, IO, R>,
}

impl<SQL, IO: PgTransport, R> FetchOne<SQL, IO, R> {
    pub(crate) fn new(fetch: RowStream<SQL, IO, R>) -> Self {
        Self { inner: FetchOptional::new(fetch) }
    }
}

impl<SQL, IO, R> Future for FetchOne<SQL, IO, R>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
    R: FromRow,
{
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.inner).poll(cx)?) {
            Some(row) => Poll::Ready(Ok(row)),
            None => Poll::Ready(Err(RowNotFound.into())),
        }
    }
}

/// Returned [`fetch_optional`][super::Query::fetch_optional] future.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchOptional<SQL, IO: PgTransport, R> {
    fetch: RowStream<SQL, IO, R>,
    row: Option<R>,
}

// `row` is never pinned
impl<SQL: Unpin, IO: PgTransport, R> Unpin for FetchOptional<SQL, IO, R> { }

impl<SQL, IO: PgTransport, R> FetchOptional<SQL, IO, R> {
    pub(crate) fn new(fetch: RowStream<SQL, IO, R>) -> Self {
        Self { fetch, row: None }
    }
}

impl<SQL, IO, R> Future for FetchOptional<SQL, IO, R>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
    R: FromRow,
{
    type Output = Result<Option<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        // `PortalSuspended` or `CommandComplete` follows, then `ReadyForQuery`
        while let Some(row) = ready!(Pin::new(&mut me.fetch).poll_next(cx)?) {
            if me.row.is_none() {
                me.row = Some(row);
            }
        }

        Poll::Ready(Ok(me.row.take()))
    }
}
