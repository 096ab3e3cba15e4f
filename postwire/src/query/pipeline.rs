use crate::{
    Error, Result, Row,
    common::verbose,
    encode::{Argument, Encode},
    error::Aborted,
    postgres::backend,
    session::Event,
    sql::Sql,
    statement::Prepared,
    transport::{PgTransport, PgTransportExt},
};

use super::{QueryResult, encode_params};

const COPY_REJECTED: &str = "COPY FROM STDIN requires `copy_in`";

/// Send multiple extended queries in one round trip.
///
/// Queries are sent back to back followed by a single `Sync`, responses are
/// matched in the order the queries were added. When a query fails, the
/// server skips the rest, those are reported as
/// [`Aborted`][crate::ErrorKind::Aborted].
///
/// ```no_run
/// # async fn app(mut conn: postwire::Connection) -> postwire::Result<()> {
/// let results = postwire::pipeline(&mut conn)
///     .add("INSERT INTO post(name) VALUES($1)")
///     .bind("foo")
///     .add("SELECT count(*) FROM post")
///     .run()
///     .await?;
///
/// for result in results {
///     let result = result?;
/// }
/// # Ok(())
/// # }
/// ```
pub fn pipeline<IO>(io: IO) -> Pipeline<IO> {
    Pipeline { io, queries: vec![], error: None }
}

/// Pipeline builder, see [`pipeline`].
#[derive(Debug)]
#[must_use = "pipeline does nothing unless `run`"]
pub struct Pipeline<IO> {
    io: IO,
    queries: Vec<Entry>,
    error: Option<Error>,
}

#[derive(Debug)]
struct Entry {
    sql: String,
    prepared: Option<Prepared>,
    args: Vec<Argument>,
}

impl<IO> Pipeline<IO> {
    /// Add a query, following [`bind`][Pipeline::bind] apply to it.
    pub fn add<SQL: Sql>(mut self, sql: SQL) -> Self {
        self.queries.push(Entry {
            sql: sql.sql().to_owned(),
            prepared: sql.prepared().cloned(),
            args: vec![],
        });
        self
    }

    /// Bind parameter of the last added query.
    pub fn bind<V: Encode>(mut self, value: V) -> Self {
        match self.queries.last_mut() {
            Some(entry) => entry.args.push(value.into_argument()),
            None => {
                self.error.get_or_insert_with(|| Error::invalid_state("pipeline `bind` before `add`"));
            }
        }
        self
    }

    /// Returns the number of queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl<IO: PgTransport> Pipeline<IO> {
    /// Send every query and collect their results.
    ///
    /// The outer error is for failures affecting the whole pipeline, such as
    /// encoding or io error, the inner one is per query.
    pub async fn run(mut self) -> Result<Vec<Result<QueryResult>>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.queries.is_empty() {
            return Ok(vec![]);
        }

        self.io.drain().await?;

        // encode everything before writing anything
        let mut encoded = Vec::with_capacity(self.queries.len());
        for (i, entry) in self.queries.iter().enumerate() {
            let params = encode_params(self.io.registry(), &entry.args, entry.prepared.as_ref())
                .map_err(|err| Error::from(err).context(format!("pipeline query {i}")))?;
            encoded.push(params);
        }

        let session = self.io.session();
        let mut ids = Vec::with_capacity(self.queries.len());
        for (entry, params) in self.queries.iter().zip(encoded) {
            let id = session.next_id();
            let stmt = match &entry.prepared {
                Some(prepared) => prepared.name(),
                None => {
                    let oids = params.iter().map(|p| p.oid()).collect::<Vec<_>>();
                    session.parse(id, "", &entry.sql, &oids)?;
                    ""
                }
            };
            session.bind(id, "", stmt, params)?;
            session.describe_portal(id, "")?;
            session.execute(id, "", 0)?;
            ids.push(id);
        }
        let sync = session.next_id();
        session.sync(sync)?;

        verbose!(queries = ids.len(), "pipeline sent");

        let mut results = ids.iter().map(|_| Ok(QueryResult::default())).collect::<Vec<Result<_>>>();
        let mut sync_error = None;

        loop {
            let event = self.io.event().await?;

            let Some(nth) = ids.iter().position(|id| *id == event.id()) else {
                match event {
                    Event::Ready { id, .. } if id == sync => break,
                    Event::Error { id, error } if id == sync => sync_error = Some(error),
                    event => {
                        verbose!(?event, "discard");
                        let _ = event;
                    }
                }
                continue;
            };

            if let Event::Error { error, .. } = event {
                results[nth] = Err(error);
                continue;
            }
            if let Event::Aborted { .. } = event {
                results[nth] = Err(Aborted.into());
                continue;
            }

            let Ok(result) = &mut results[nth] else {
                continue;
            };

            match event {
                Event::RowDescription { columns, .. } => result.columns = Some(columns),
                Event::DataRow { values, .. } => {
                    let Some(columns) = result.columns.clone() else {
                        results[nth] = Err(Error::invalid_state("DataRow without RowDescription"));
                        continue;
                    };
                    match Row::new(columns, values, self.io.registry().clone()) {
                        Ok(row) => result.rows.push(row),
                        Err(err) => results[nth] = Err(err.into()),
                    }
                }
                Event::CommandComplete { tag, .. } => {
                    result.rows_affected = backend::rows_affected(&tag);
                }
                Event::CopyIn { .. } => {
                    self.io.session().copy_fail(COPY_REJECTED)?;
                    results[nth] = Err(Error::invalid_state(COPY_REJECTED));
                }
                _ => {}
            }
        }

        match sync_error {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}
