//! Named prepared statement.
use std::{
    fmt,
    sync::{Arc, atomic::Ordering},
};

use crate::{
    Error, Result,
    postgres::{ColumnDescriptor, Oid},
    session::Event,
    transport::{PgTransport, PgTransportExt},
};

type AtomicId = std::sync::atomic::AtomicU32;

/// Statement name, unique within the process.
#[derive(Clone, PartialEq, Eq)]
pub struct StatementName([u8; 8]);

impl StatementName {
    pub(crate) fn next() -> Self {
        static ID: AtomicId = AtomicId::new(0);

        let id = ID.fetch_add(1, Ordering::Relaxed) % 10_000_000;
        let mut buf = [b'w', b'0', b'0', b'0', b'0', b'0', b'0', b'0'];
        let len = buf.len();

        let mut b = itoa::Buffer::new();
        let id = b.format(id);
        let i = id.as_bytes();
        buf[len - i.len()..].copy_from_slice(i);

        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: constructed from ascii digits only
        unsafe { std::str::from_utf8_unchecked(&self.0[..]) }
    }
}

impl fmt::Display for StatementName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for StatementName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("StatementName").field(&self.as_str()).finish()
    }
}

/// A statement parsed and described by the server.
///
/// Pass `&Prepared` as the sql of [`query`][crate::query()] to execute it
/// without parsing again. The statement lives on the connection that
/// prepared it, executing it on another connection fails.
///
/// Created by [`prepare`][crate::query::prepare].
#[derive(Debug, Clone)]
pub struct Prepared {
    pub(crate) name: StatementName,
    pub(crate) sql: String,
    pub(crate) params: Vec<Oid>,
    pub(crate) columns: Option<Arc<[ColumnDescriptor]>>,
}

impl Prepared {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter types inferred by the server.
    pub fn params(&self) -> &[Oid] {
        &self.params
    }

    /// Result columns, [`None`] if the statement returns no row.
    ///
    /// Formats are not known until bound, every column reports text format.
    pub fn columns(&self) -> Option<&[ColumnDescriptor]> {
        self.columns.as_deref()
    }

    /// Deallocate the statement on the server.
    pub async fn close<IO: PgTransport>(self, mut io: IO) -> Result<()> {
        io.drain().await?;

        let session = io.session();
        let id = session.next_id();
        session.close_statement(id, self.name())?;
        session.sync(id)?;

        let mut error = None;
        loop {
            match io.event().await? {
                Event::CloseComplete { .. } => {}
                Event::Error { error: e, .. } => error = Some(e),
                Event::Ready { id: ready, .. } if ready == id => break,
                event => return Err(Error::invalid_state(format!("unexpected {event:?} closing statement"))),
            }
        }

        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
