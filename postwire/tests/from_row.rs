#![cfg(feature = "macros")]
mod common;

use common::*;
use postwire::{Config, FromRow, postgres::oid};

#[derive(Debug, FromRow)]
struct Post {
    id: i32,
    #[postwire(rename = "title")]
    name: String,
    body: Option<String>,
}

#[derive(Debug, FromRow)]
struct Pair(i32, String);

fn post_rows() -> Vec<Vec<u8>> {
    vec![
        parse_complete(),
        bind_complete(),
        row_description(&[("id", oid::INT4, 1), ("title", oid::TEXT, 1), ("body", oid::TEXT, 1)]),
        data_row(&[int4(1), text("hello"), None]),
        data_row(&[int4(2), text("world"), text("content")]),
        command_complete("SELECT 2"),
        ready(),
    ]
}

#[tokio::test]
async fn derive_named_fields() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'S').await;
        server.send(&post_rows()).await;
    };

    let (posts, _) = tokio::join!(
        postwire::query_as::<_, _, Post>("SELECT id, title, body FROM post", &mut conn).fetch_all(),
        script,
    );
    let posts = posts.unwrap();

    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].id, 1);
    assert_eq!(posts[0].name, "hello");
    assert!(posts[0].body.is_none());
    assert_eq!(posts[1].body.as_deref(), Some("content"));
}

#[tokio::test]
async fn derive_tuple_fields() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'S').await;
        server.send(&post_rows()).await;
    };

    let (pairs, _) = tokio::join!(
        postwire::query_as::<_, _, Pair>("SELECT id, title, body FROM post", &mut conn).fetch_all(),
        script,
    );
    let pairs = pairs.unwrap();

    assert_eq!(pairs[1].0, 2);
    assert_eq!(pairs[1].1, "world");
}

#[tokio::test]
async fn derive_missing_column() {
    #[derive(Debug, FromRow)]
    struct Missing {
        #[allow(dead_code)]
        author: String,
    }

    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'S').await;
        server.send(&post_rows()).await;
    };

    let (rows, _) = tokio::join!(
        postwire::query_as::<_, _, Missing>("SELECT id, title, body FROM post", &mut conn).fetch_all(),
        script,
    );
    assert!(matches!(rows.unwrap_err().kind(), postwire::ErrorKind::Decode(_)));
}
