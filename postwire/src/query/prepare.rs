use crate::{
    Error, Result,
    postgres::Oid,
    session::Event,
    statement::{Prepared, StatementName},
    transport::{PgTransport, PgTransportExt},
};

/// Create a named prepared statement, parameter types are inferred by the server.
///
/// ```no_run
/// # async fn app(mut conn: postwire::Connection) -> postwire::Result<()> {
/// let stmt = postwire::prepare("SELECT name FROM post WHERE id = $1", &mut conn).await?;
///
/// for id in 0..4 {
///     let name = postwire::query_scalar::<_, _, String>(&stmt, &mut conn)
///         .bind(id)
///         .fetch_optional()
///         .await?;
/// }
///
/// stmt.close(&mut conn).await?;
/// # Ok(())
/// # }
/// ```
pub async fn prepare<IO: PgTransport>(sql: &str, io: IO) -> Result<Prepared> {
    prepare_typed(sql, &[], io).await
}

/// Create a named prepared statement with explicit parameter types.
///
/// `types` may be shorter than the number of parameters, `0` leaves a type
/// to the server.
pub async fn prepare_typed<IO: PgTransport>(sql: &str, types: &[Oid], mut io: IO) -> Result<Prepared> {
    io.drain().await?;

    let name = StatementName::next();
    let session = io.session();
    let id = session.next_id();
    session.parse(id, name.as_str(), sql, types)?;
    session.describe_statement(id, name.as_str())?;
    session.sync(id)?;

    let mut params = vec![];
    let mut columns = None;
    let mut error = None;

    loop {
        let event = io.event().await?;
        match event {
            Event::ParseComplete { .. } | Event::NoData { .. } => {}
            Event::ParameterDescription { types, .. } => params = types,
            Event::RowDescription { columns: c, .. } => columns = Some(c),
            Event::Error { error: e, .. } => {
                error.get_or_insert(e);
            }
            Event::Aborted { .. } => {}
            Event::Ready { id: ready, .. } if ready == id => break,
            event => return Err(Error::invalid_state(format!("unexpected {event:?} preparing statement"))),
        }
    }

    if let Some(err) = error {
        return Err(err);
    }

    Ok(Prepared { name, sql: sql.to_owned(), params, columns })
}
