mod common;

use common::*;
use postwire::{
    Config, Connection, ErrorKind,
    auth::{AuthError, md5_password},
    postgres::{TransactionStatus, oid},
    session::AsyncMessage,
};
use std::time::Duration;

#[tokio::test]
async fn trust_startup() {
    let (client, mut server) = pair();
    server
        .send(&[auth_ok(), parameter_status("server_version", "17.0"), backend_key(42, 7), ready()])
        .await;

    let config = Config::default().user("alice").dbname("app").application_name("test");
    let conn = Connection::connect_stream(client, config).await.unwrap();

    let params = server.startup().await;
    assert!(params.contains(&("user".into(), "alice".into())));
    assert!(params.contains(&("database".into(), "app".into())));
    assert!(params.contains(&("application_name".into(), "test".into())));

    assert_eq!(conn.parameter("server_version"), Some("17.0"));
    let key = conn.backend_key().unwrap();
    assert_eq!((key.process_id, key.secret_key), (42, 7));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn md5_password_auth() {
    let (client, mut server) = pair();
    let salt = [1, 2, 3, 4];

    let config = Config::default().user("alice").password("secret");
    let script = async {
        server.send(&[auth_md5(salt)]).await;
        server.startup().await;
        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'p');
        assert_eq!(cstr(&mut body), md5_password("alice", "secret", salt));
        server.send(&[auth_ok(), ready()]).await;
    };

    let (conn, _) = tokio::join!(Connection::connect_stream(client, config), script);
    assert!(conn.is_ok());
}

#[tokio::test]
async fn cleartext_password_auth() {
    let (client, mut server) = pair();

    let config = Config::default().password("hunter2");
    let script = async {
        server.send(&[auth_cleartext()]).await;
        server.startup().await;
        let (tag, mut body) = server.recv().await;
        assert_eq!(tag, b'p');
        assert_eq!(cstr(&mut body), "hunter2");
        server.send(&[auth_ok(), ready()]).await;
    };

    let (conn, _) = tokio::join!(Connection::connect_stream(client, config), script);
    assert!(conn.is_ok());
}

#[tokio::test]
async fn password_required_but_missing() {
    let (client, mut server) = pair();
    server.send(&[auth_cleartext()]).await;

    let err = Connection::connect_stream(client, Config::default()).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Auth(AuthError::MissingPassword)), "{err:?}");
}

#[tokio::test]
async fn rejected_credentials() {
    let (client, mut server) = pair();
    server.send(&[fatal("28P01", "password authentication failed")]).await;

    let err = Connection::connect_stream(client, Config::default()).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Auth(AuthError::Rejected(_))), "{err:?}");
}

#[tokio::test]
async fn notification_during_query() {
    let (mut conn, mut server) = connect(Config::default()).await;
    let mut subscription = conn.subscribe();

    let script = async {
        server.recv_until(b'Q').await;
        server
            .send(&[
                notice("relation already exists, skipping"),
                command_complete("LISTEN"),
                notification(99, "jobs", "42"),
                parameter_status("TimeZone", "UTC"),
                ready(),
            ])
            .await;
    };

    let (results, _) = tokio::join!(postwire::simple("LISTEN jobs", &mut conn).results(), script);
    assert_eq!(results.unwrap().len(), 1);

    assert!(matches!(subscription.try_recv(), Some(AsyncMessage::Notice(n)) if n.code() == "00000"));
    match subscription.try_recv() {
        Some(AsyncMessage::Notification(n)) => {
            assert_eq!(n.process_id, 99);
            assert_eq!(n.channel.as_str(), "jobs");
            assert_eq!(n.payload.as_str(), "42");
        }
        other => panic!("expected notification, got {other:?}"),
    }
    assert!(matches!(subscription.try_recv(), Some(AsyncMessage::ParameterStatus { .. })));
    assert_eq!(conn.parameter("TimeZone"), Some("UTC"));
}

#[tokio::test]
async fn notification_while_idle() {
    let (mut conn, mut server) = connect(Config::default()).await;
    let mut subscription = conn.subscribe();

    server.send(&[notification(7, "jobs", "hello")]).await;
    conn.wait_async_message().await.unwrap();

    let Some(AsyncMessage::Notification(n)) = subscription.try_recv() else {
        panic!("expected notification");
    };
    assert_eq!(n.payload.as_str(), "hello");
}

#[tokio::test]
async fn receive_timeout_closes_connection() {
    let config = Config::default().recv_timeout(Duration::from_millis(50));
    let (mut conn, mut server) = connect(config).await;

    let err = postwire::execute("SELECT pg_sleep(10)", &mut conn).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Timeout(_)), "{err:?}");
    assert!(conn.is_closed());

    let err = postwire::execute("SELECT 1", &mut conn).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Closed(_)), "{err:?}");

    assert_eq!(server.recv_until(b'S').await, b"PBDES");
}

#[tokio::test]
async fn unexpected_message_is_fatal() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'S').await;
        // `CopyBothResponse` is never expected
        server.send(&[msg(b'W', &[0, 0, 0])]).await;
    };

    let (result, _) = tokio::join!(async { postwire::execute("SELECT 1", &mut conn).await }, script);
    let err = result.unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert!(conn.is_closed());
}

#[tokio::test]
async fn server_closing_is_reported() {
    let (mut conn, server) = connect(Config::default()).await;
    drop(server);

    let err = postwire::query_scalar::<_, _, i32>("SELECT 1", &mut conn)
        .fetch_one()
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Closed(_) | ErrorKind::Io(_)), "{err:?}");
    assert!(conn.is_closed());
}

#[tokio::test]
async fn transaction_status_follows_ready() {
    let (mut conn, mut server) = connect(Config::default()).await;

    let script = async {
        server.recv_until(b'Q').await;
        server.send(&[command_complete("BEGIN"), ready_in_transaction()]).await;

        server.recv_until(b'S').await;
        server
            .send(&[
                parse_complete(),
                bind_complete(),
                row_description(&[("n", oid::INT4, 1)]),
                data_row(&[int4(1)]),
                command_complete("SELECT 1"),
                ready_in_transaction(),
            ])
            .await;

        server.recv_until(b'Q').await;
        server.send(&[command_complete("COMMIT"), ready()]).await;
    };

    let client = async {
        let mut tx = postwire::begin(&mut conn).await.unwrap();
        let n = postwire::query_scalar::<_, _, i32>("SELECT 1", &mut tx).fetch_one().await.unwrap();
        assert_eq!(n, 1);
        tx.commit().await.unwrap();
    };

    tokio::join!(client, script);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}
