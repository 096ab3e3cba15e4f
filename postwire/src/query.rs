//! Query API types.
//!
//! Every function here takes the sql and an `IO`, which is any
//! [`PgTransport`], such as `&mut Connection` or `&mut Transaction`.
//!
//! - [`query`] and [`query_as`], extended query returning rows
//! - [`query_scalar`], first column of each row
//! - [`execute`], rows affected
//! - [`simple`], simple query which may contain multiple statements
//! - [`pipeline`], multiple extended queries in one round trip
//! - [`copy_in`] and [`copy_out`]
//! - [`prepare`], named prepared statement
//! - [`begin`], transaction
use std::marker::PhantomData;

use crate::{
    Result, Row,
    codec::{CodecRegistry, EncodeError},
    encode::{Argument, Encode, Parameter},
    postgres::{Oid, oid},
    row::{Decode, FromRow},
    sql::Sql,
    statement::Prepared,
    transport::PgTransport,
};

mod row_stream;
mod fetch_all;
mod fetch_one;
mod simple;
mod pipeline;
mod copy;
mod prepare;

pub use row_stream::RowStream;
pub use fetch_all::{Execute, FetchAll};
pub use fetch_one::{FetchOne, FetchOptional};
pub use simple::{QueryResult, Results, SimpleMessage, SimpleQuery, simple};
pub(crate) use simple::simple_command;
pub use pipeline::{Pipeline, pipeline};
pub use copy::{CopyIn, CopyOut, copy_in, copy_out};
pub use prepare::{prepare, prepare_typed};
pub use crate::transaction::begin;

/// Entrypoint of the query API, returning [`Row`].
///
/// ```no_run
/// # async fn app(mut conn: postwire::Connection) -> postwire::Result<()> {
/// let rows = postwire::query("SELECT id, name FROM post WHERE id > $1", &mut conn)
///     .bind(10)
///     .fetch_all()
///     .await?;
///
/// for row in rows {
///     let name: String = row.try_get("name")?;
/// }
/// # Ok(())
/// # }
/// ```
pub fn query<SQL, IO>(sql: SQL, io: IO) -> Query<SQL, IO, Row> {
    Query::new(sql, io)
}

/// Same as [`query`] with [`FromRow`] implementation as the output.
pub fn query_as<SQL, IO, R>(sql: SQL, io: IO) -> Query<SQL, IO, R> {
    Query::new(sql, io)
}

/// Same as [`query`], returning the first column of each row.
pub fn query_scalar<SQL, IO, T>(sql: SQL, io: IO) -> QueryScalar<SQL, IO, T> {
    QueryScalar { query: Query::new(sql, io) }
}

/// Same as [`query`], for statements where only the rows affected matter.
///
/// ```no_run
/// # async fn app(mut conn: postwire::Connection) -> postwire::Result<()> {
/// let rows = postwire::execute("DELETE FROM post WHERE id = $1", &mut conn)
///     .bind(4)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub fn execute<SQL, IO>(sql: SQL, io: IO) -> Query<SQL, IO, ()> {
    Query::new(sql, io)
}

/// The query API.
#[derive(Debug)]
#[must_use = "query does nothing unless executed"]
pub struct Query<SQL, IO, R> {
    sql: SQL,
    io: IO,
    args: Vec<Argument>,
    fetch_size: u32,
    _p: PhantomData<fn() -> R>,
}

impl<SQL, IO, R> Query<SQL, IO, R> {
    fn new(sql: SQL, io: IO) -> Self {
        Self { sql, io, args: Vec::new(), fetch_size: 0, _p: PhantomData }
    }

    /// Bind query parameter.
    pub fn bind<V: Encode>(mut self, value: V) -> Self {
        self.args.push(value.into_argument());
        self
    }

    /// Request at most `rows` rows per round trip, `0` fetch everything at once.
    ///
    /// Next rows are only requested when the previous batch is consumed.
    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.fetch_size = rows;
        self
    }
}

impl<SQL, IO, R> Query<SQL, IO, R>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
    R: FromRow,
{
    /// Fetch rows using [`Stream`][futures_core::Stream] api.
    ///
    /// A row which fails to decode is yielded as error, following rows
    /// are still delivered.
    pub fn fetch(self) -> RowStream<SQL, IO, R> {
        RowStream::new(self.sql, self.io, self.args, 0, self.fetch_size)
    }

    /// Fetch all rows into [`Vec`].
    pub fn fetch_all(self) -> FetchAll<SQL, IO, R> {
        FetchAll::new(self.fetch())
    }

    /// Fetch one row, fail with [`RowNotFound`][crate::row::RowNotFound] if none.
    pub fn fetch_one(self) -> FetchOne<SQL, IO, R> {
        FetchOne::new(RowStream::new(self.sql, self.io, self.args, 1, 0))
    }

    /// Optionally fetch one row.
    pub fn fetch_optional(self) -> FetchOptional<SQL, IO, R> {
        FetchOptional::new(RowStream::new(self.sql, self.io, self.args, 1, 0))
    }

    /// Execute statement and return number of rows affected.
    pub fn execute(self) -> Execute<SQL, IO> {
        Execute::new(RowStream::new(self.sql, self.io, self.args, 0, self.fetch_size))
    }
}

impl<SQL, IO, R> IntoFuture for Query<SQL, IO, R>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
    R: FromRow,
{
    type Output = Result<u64>;

    type IntoFuture = Execute<SQL, IO>;

    fn into_future(self) -> Self::IntoFuture {
        self.execute()
    }
}

/// Query returning the first column of each row, see [`query_scalar`].
#[derive(Debug)]
#[must_use = "query does nothing unless executed"]
pub struct QueryScalar<SQL, IO, T> {
    query: Query<SQL, IO, (T,)>,
}

impl<SQL, IO, T> QueryScalar<SQL, IO, T> {
    /// Bind query parameter.
    pub fn bind<V: Encode>(mut self, value: V) -> Self {
        self.query = self.query.bind(value);
        self
    }
}

impl<SQL, IO, T> QueryScalar<SQL, IO, T>
where
    SQL: Sql + Unpin,
    IO: PgTransport,
    T: Decode,
{
    /// Fetch the value of every row.
    pub async fn fetch_all(self) -> Result<Vec<T>> {
        let rows = self.query.fetch_all().await?;
        Ok(rows.into_iter().map(|(value,)| value).collect())
    }

    /// Fetch the value of one row, fail with [`RowNotFound`][crate::row::RowNotFound] if none.
    pub async fn fetch_one(self) -> Result<T> {
        self.query.fetch_one().await.map(|(value,)| value)
    }

    /// Optionally fetch the value of one row.
    pub async fn fetch_optional(self) -> Result<Option<T>> {
        let row = self.query.fetch_optional().await?;
        Ok(row.map(|(value,)| value))
    }
}

/// Encode query arguments, checking them against the prepared statement.
///
/// Nothing is written on failure, the session stays usable.
pub(crate) fn encode_params(
    registry: &CodecRegistry,
    args: &[Argument],
    prepared: Option<&Prepared>,
) -> Result<Vec<Parameter>, EncodeError> {
    if args.len() > u16::MAX as usize {
        return Err(EncodeError::TooManyParameters(args.len()));
    }
    if let Some(prepared) = prepared {
        if prepared.params().len() != args.len() {
            return Err(EncodeError::ParameterCount {
                expect: prepared.params().len(),
                found: args.len(),
            });
        }
    }

    let mut params = Vec::with_capacity(args.len());
    for (position, arg) in args.iter().enumerate() {
        let param = registry.encode_argument(arg)?;

        if param.value().is_some_and(|v| v.len() > i32::MAX as usize) {
            return Err(EncodeError::invalid(format!("parameter ${} exceeds 2GB", position + 1)));
        }

        if let Some(&expect) = prepared.and_then(|p| p.params().get(position)) {
            if !compatible(expect, param.oid()) {
                return Err(EncodeError::TypeMismatch { position, expect, found: param.oid() });
            }
        }

        params.push(param);
    }

    Ok(params)
}

/// The server interprets a bound value with the statement type, binary text
/// is shared by the character types.
fn compatible(expect: Oid, found: Oid) -> bool {
    const TEXTS: [Oid; 5] = [oid::TEXT, oid::VARCHAR, oid::BPCHAR, oid::NAME, oid::UNKNOWN];

    expect == found
        || expect == oid::UNSPECIFIED
        || found == oid::UNSPECIFIED
        || (TEXTS.contains(&expect) && TEXTS.contains(&found))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::statement::StatementName;

    fn prepared(params: Vec<Oid>) -> Prepared {
        Prepared {
            name: StatementName::next(),
            sql: String::from("select $1"),
            params,
            columns: None,
        }
    }

    #[test]
    fn encode_checks_prepared_params() {
        let registry = CodecRegistry::new();

        let args = vec![1i32.into_argument()];
        let ok = encode_params(&registry, &args, Some(&prepared(vec![oid::INT4]))).unwrap();
        assert_eq!(ok[0].oid(), oid::INT4);

        let err = encode_params(&registry, &args, Some(&prepared(vec![oid::INT4, oid::TEXT])));
        assert!(matches!(err, Err(EncodeError::ParameterCount { expect: 2, found: 1 })));

        let err = encode_params(&registry, &args, Some(&prepared(vec![oid::INT8])));
        assert!(matches!(err, Err(EncodeError::TypeMismatch { position: 0, expect: oid::INT8, .. })));

        let args = vec!["foo".into_argument()];
        assert!(encode_params(&registry, &args, Some(&prepared(vec![oid::VARCHAR]))).is_ok());
    }

    #[test]
    fn encode_unsupported_value() {
        struct Opaque;
        let args = vec![Argument::value(Opaque)];
        let err = encode_params(&CodecRegistry::new(), &args, None);
        assert!(matches!(err, Err(EncodeError::Unsupported { .. })));

        let args = vec![None::<String>.into_argument()];
        let params = encode_params(&CodecRegistry::new(), &args, None).unwrap();
        assert!(params[0].is_null());
    }
}
