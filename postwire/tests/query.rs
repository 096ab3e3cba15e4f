mod common;

use bytes::Buf;
use common::*;
use futures::StreamExt;
use postwire::{
    Config, ErrorKind, FromRow, Row,
    codec::{DecodeError, EncodeError},
    postgres::oid,
};
use std::{marker::PhantomPinned, time::Duration};

#[tokio::test]
async fn simple_batch_groups_results() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'Q');
        assert_eq!(cstr(&mut body), "SELECT 1 AS a; SELECT n AS b FROM t");
        server
            .send(&[
                row_description(&[("a", oid::INT4, 0)]),
                data_row(&[text("1")]),
                command_complete("SELECT 1"),
                row_description(&[("b", oid::INT4, 0)]),
                data_row(&[text("2")]),
                data_row(&[text("3")]),
                command_complete("SELECT 2"),
                ready(),
            ])
            .await;
    };

    let (results, _) = tokio::join!(
        postwire::simple("SELECT 1 AS a; SELECT n AS b FROM t", &mut conn).results(),
        script,
    );
    let results = results.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].rows.len(), 1);
    assert_eq!(results[0].rows[0].try_get::<_, i32>("a").unwrap(), 1);
    assert_eq!(results[1].rows_affected, 2);
    let values = results[1]
        .rows
        .iter()
        .map(|row| row.try_get::<_, i32>(0).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(values, [2, 3]);
}

#[tokio::test]
async fn error_drains_back_to_ready() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'Q').await;
        server
            .send(&[
                row_description(&[("a", oid::INT4, 0)]),
                data_row(&[text("1")]),
                command_complete("SELECT 1"),
                error("42703", "column \"foo\" does not exist"),
                ready(),
            ])
            .await;

        server.recv_until(b'S').await;
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("n", oid::INT4, 1)]),
                data_row(&[int4(5)]),
                command_complete("SELECT 1"),
                ready(),
            ])
            .await;
    };

    let client = async {
        let err = postwire::simple("SELECT 1; SELECT foo", &mut conn).results().await.unwrap_err();
        assert_eq!(err.as_database().unwrap().code(), "42703");
        assert!(!err.is_fatal());

        let n = postwire::query_scalar::<_, _, i32>("SELECT 5", &mut conn).fetch_one().await.unwrap();
        assert_eq!(n, 5);
    };

    tokio::join!(client, script);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn pipeline_aborts_after_failure() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        assert_eq!(server.recv_until(b'S').await, b"PBDEPBDEPBDES");
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("n", oid::INT4, 1)]),
                data_row(&[int4(1)]),
                command_complete("SELECT 1"),
                error("42P01", "relation \"missing\" does not exist"),
                ready(),
            ])
            .await;
    };

    let pipeline = postwire::pipeline(&mut conn)
        .add("SELECT $1::int4")
        .bind(1)
        .add("SELECT * FROM missing")
        .add("SELECT 3");
    assert_eq!(pipeline.len(), 3);

    let (results, _) = tokio::join!(pipeline.run(), script);
    let results = results.unwrap();

    let first = results[0].as_ref().unwrap();
    assert_eq!(first.rows[0].try_get::<_, i32>(0).unwrap(), 1);
    assert_eq!(first.rows_affected, 1);

    let second = results[1].as_ref().unwrap_err();
    assert_eq!(second.as_database().unwrap().code(), "42P01");

    let third = results[2].as_ref().unwrap_err();
    assert!(matches!(third.kind(), ErrorKind::Aborted(_)), "{third:?}");
}

#[tokio::test]
async fn pipeline_bind_before_add() {
    let (mut conn, _server) = connect(Config::default()).await;
    let err = postwire::pipeline(&mut conn).bind(1).add("SELECT $1").run().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidState(_)));
}

#[tokio::test]
async fn fetch_size_waits_for_demand() {
    let (mut conn, mut server) = connect(Config::default()).await;
    let (consumed, on_consumed) = tokio::sync::oneshot::channel::<()>();
    let (checked, on_checked) = tokio::sync::oneshot::channel::<()>();

    let script = async {
        let mut tags = vec![];
        loop {
            let (tag, mut body) = server.recv().await;
            tags.push(tag);
            match tag {
                b'E' => {
                    assert_eq!(cstr(&mut body), "");
                    assert_eq!(body.get_u32(), 2);
                }
                b'H' => break,
                _ => {}
            }
        }
        assert_eq!(tags, b"PBDEH");
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("n", oid::INT4, 1)]),
                data_row(&[int4(1)]),
                data_row(&[int4(2)]),
                portal_suspended(),
            ])
            .await;

        // the batch is consumed but the next one is not requested yet
        on_consumed.await.unwrap();
        assert!(server.try_recv(Duration::from_millis(50)).await.is_none());
        checked.send(()).unwrap();

        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'E');
        cstr(&mut body);
        assert_eq!(body.get_u32(), 2);
        assert_eq!(server.recv().await.0, b'H');
        server.send(&[data_row(&[int4(3)]), command_complete("SELECT 3")]).await;

        assert_eq!(server.recv().await.0, b'S');
        server.send(&[ready()]).await;
    };

    let client = async {
        let mut rows = postwire::query_as::<_, _, (i32,)>("SELECT n FROM t", &mut conn)
            .fetch_size(2)
            .fetch();

        assert_eq!(rows.next().await.unwrap().unwrap(), (1,));
        assert_eq!(rows.next().await.unwrap().unwrap(), (2,));
        consumed.send(()).unwrap();
        on_checked.await.unwrap();

        assert_eq!(rows.next().await.unwrap().unwrap(), (3,));
        assert!(rows.next().await.is_none());
        assert_eq!(rows.rows_affected(), 3);
    };

    tokio::join!(client, script);
}

#[tokio::test]
async fn decode_error_is_per_row() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'S').await;
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("n", oid::INT4, 1)]),
                data_row(&[int4(2)]),
                data_row(&[Some(vec![1, 2, 3])]),
                data_row(&[int4(4)]),
                command_complete("SELECT 3"),
                ready(),
            ])
            .await;
    };

    let client = async {
        let rows = postwire::query_as::<_, _, (i32,)>("SELECT n FROM t", &mut conn)
            .fetch()
            .collect::<Vec<_>>()
            .await;

        assert_eq!(rows.len(), 3);
        assert_eq!(*rows[0].as_ref().unwrap(), (2,));
        assert!(matches!(rows[1].as_ref().unwrap_err().kind(), ErrorKind::Decode(_)));
        assert_eq!(*rows[2].as_ref().unwrap(), (4,));
    };

    tokio::join!(client, script);
    assert!(!conn.is_closed());
}

/// Row type which is not `Unpin`.
struct Pinned {
    id: i32,
    _pin: PhantomPinned,
}

impl FromRow for Pinned {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(Pinned { id: row.try_get(0)?, _pin: PhantomPinned })
    }
}

#[tokio::test]
async fn fetch_rows_which_are_not_unpin() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let rows = |n| {
        vec![
            parse_complete(),
            bind_complete(),
            row_description(&[("id", oid::INT4, 1)]),
            data_row(&[int4(n)]),
            command_complete("SELECT 1"),
            ready(),
        ]
    };
    let script = async {
        server.recv_until(b'S').await;
        server.send(&rows(1)).await;
        server.recv_until(b'S').await;
        server.send(&rows(2)).await;
    };

    let client = async {
        let all = postwire::query_as::<_, _, Pinned>("SELECT 1", &mut conn).fetch_all().await.unwrap();
        assert_eq!(all[0].id, 1);
        let one = postwire::query_as::<_, _, Pinned>("SELECT 2", &mut conn).fetch_one().await.unwrap();
        assert_eq!(one.id, 2);
    };

    tokio::join!(client, script);
}

#[tokio::test]
async fn fetch_optional_and_one() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'P');
        cstr(&mut body);
        assert_eq!(cstr(&mut body), "SELECT name FROM post WHERE id = $1");
        assert_eq!(body.get_i16(), 1);
        assert_eq!(body.get_u32(), oid::INT4);
        server.recv_until(b'S').await;
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("name", oid::TEXT, 1)]),
                command_complete("SELECT 0"),
                ready(),
            ])
            .await;

        server.recv_until(b'S').await;
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("name", oid::TEXT, 1)]),
                command_complete("SELECT 0"),
                ready(),
            ])
            .await;
    };

    let client = async {
        let name = postwire::query_scalar::<_, _, String>("SELECT name FROM post WHERE id = $1", &mut conn)
            .bind(7)
            .fetch_optional()
            .await
            .unwrap();
        assert!(name.is_none());

        let err = postwire::query("SELECT name FROM post", &mut conn).fetch_one().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::RowNotFound(_)));
    };

    tokio::join!(client, script);
}

#[tokio::test]
async fn execute_returns_rows_affected() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'S').await;
        server
            .send(&[parse_complete(), bind_complete(), no_data(), command_complete("DELETE 4"), ready()])
            .await;

        server.recv_until(b'S').await;
        server.send(&[parse_complete(), bind_complete(), no_data(), empty_query(), ready()]).await;
    };

    let client = async {
        let rows = postwire::execute("DELETE FROM post WHERE id > $1", &mut conn).bind(10).await.unwrap();
        assert_eq!(rows, 4);

        let err = postwire::execute("", &mut conn).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::EmptyQuery(_)));
    };

    tokio::join!(client, script);
}

#[tokio::test]
async fn prepared_statement() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'P');
        let name = cstr(&mut body);
        assert!(!name.is_empty());
        assert_eq!(server.recv_until(b'S').await, b"DS");
        server
            .send(&[
                parse_complete(),
                parameter_description(&[oid::INT4]),
                row_description(&[("n", oid::INT4, 1)]),
                ready(),
            ])
            .await;

        // no `Parse` for a prepared statement
        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'B');
        cstr(&mut body);
        assert_eq!(cstr(&mut body), name);
        assert_eq!(server.recv_until(b'S').await, b"DES");
        server
            .send(&[
                bind_complete(),
                row_description(&[("n", oid::INT4, 1)]),
                data_row(&[int4(42)]),
                command_complete("SELECT 1"),
                ready(),
            ])
            .await;

        assert_eq!(server.recv_until(b'S').await, b"CS");
        server.send(&[close_complete(), ready()]).await;
    };

    let client = async {
        let stmt = postwire::prepare("SELECT $1::int4 + 1", &mut conn).await.unwrap();
        assert_eq!(stmt.params(), &[oid::INT4]);
        assert_eq!(stmt.columns().unwrap()[0].name.as_str(), "n");

        // checked before anything is sent
        let err = postwire::query_scalar::<_, _, i32>(&stmt, &mut conn).fetch_one().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Encode(EncodeError::ParameterCount { expect: 1, found: 0 })));
        let err = postwire::query_scalar::<_, _, i32>(&stmt, &mut conn)
            .bind(1i64)
            .fetch_one()
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Encode(EncodeError::TypeMismatch { .. })));

        let n = postwire::query_scalar::<_, _, i32>(&stmt, &mut conn).bind(41).fetch_one().await.unwrap();
        assert_eq!(n, 42);

        stmt.close(&mut conn).await.unwrap();
    };

    tokio::join!(client, script);
}

#[tokio::test]
async fn copy_in_rows() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'Q');
        assert_eq!(cstr(&mut body), "COPY post(id, name) FROM STDIN");
        server.send(&[copy_in_response(2)]).await;

        let mut data = vec![];
        loop {
            let (tag, body) = server.recv().await;
            match tag {
                b'd' => data.extend_from_slice(&body),
                b'c' => break,
                tag => panic!("unexpected {}", tag as char),
            }
        }
        assert_eq!(data, b"1\tfoo\n2\tbar\n");
        server.send(&[command_complete("COPY 2"), ready()]).await;
    };

    let client = async {
        let mut copy = postwire::copy_in("COPY post(id, name) FROM STDIN", &mut conn).await.unwrap();
        assert_eq!(copy.response().column_formats.len(), 2);
        copy.send("1\tfoo\n").await.unwrap();
        copy.send(b"2\tbar\n").await.unwrap();
        assert_eq!(copy.finish().await.unwrap(), 2);
    };

    tokio::join!(client, script);
}

#[tokio::test]
async fn copy_in_abort() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'Q').await;
        server.send(&[copy_in_response(1)]).await;

        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'f');
        assert_eq!(cstr(&mut body), "changed my mind");
        server.send(&[error("57014", "COPY from stdin failed: changed my mind"), ready()]).await;
    };

    let client = async {
        let copy = postwire::copy_in("COPY post FROM STDIN", &mut conn).await.unwrap();
        copy.abort("changed my mind").await.unwrap();
    };

    tokio::join!(client, script);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn copy_out_rows() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'Q').await;
        server
            .send(&[
                copy_out_response(2),
                copy_data(b"1\tfoo\n"),
                copy_data(b"2\tbar\n"),
                copy_done(),
                command_complete("COPY 2"),
                ready(),
            ])
            .await;
    };

    let client = async {
        let mut copy = postwire::copy_out("COPY post TO STDOUT", &mut conn).await.unwrap();
        let mut data = vec![];
        while let Some(chunk) = copy.next().await {
            data.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(data, b"1\tfoo\n2\tbar\n");
        assert_eq!(copy.rows_affected(), 2);
    };

    tokio::join!(client, script);
}

#[tokio::test]
async fn dropped_stream_is_drained() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        assert_eq!(server.recv_until(b'H').await, b"PBDEH");
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("n", oid::INT4, 1)]),
                data_row(&[int4(1)]),
                portal_suspended(),
            ])
            .await;

        // the abandoned portal is closed by a `Sync` before the next query
        assert_eq!(server.recv_until(b'S').await, b"S");
        server.send(&[ready()]).await;

        assert_eq!(server.recv_until(b'S').await, b"PBDES");
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("n", oid::INT4, 1)]),
                data_row(&[int4(9)]),
                command_complete("SELECT 1"),
                ready(),
            ])
            .await;
    };

    let client = async {
        let mut rows = postwire::query_as::<_, _, (i32,)>("SELECT n FROM t", &mut conn)
            .fetch_size(1)
            .fetch();
        assert_eq!(rows.next().await.unwrap().unwrap(), (1,));
        drop(rows);

        let n = postwire::query_scalar::<_, _, i32>("SELECT 9", &mut conn).fetch_one().await.unwrap();
        assert_eq!(n, 9);
    };

    tokio::join!(client, script);
}
