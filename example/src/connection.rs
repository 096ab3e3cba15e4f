use std::{env::var, time::Duration};
use postwire::{Config, Connection, Result, execute, session::AsyncMessage};

pub async fn main() -> Result<()> {
    let url = var("DATABASE_URL").unwrap();

    let mut conn = Connection::connect(&url).await?;
    execute("SELECT 1", &mut conn).await?;
    tracing::info!(version = conn.parameter("server_version"), "connected");
    conn.close().await?;

    let config = Config::parse(&url)?
        .application_name("postwire-example")
        .recv_timeout(Duration::from_secs(10));
    let mut conn = Connection::connect_with(config).await?;

    // notification
    let mut sub = conn.subscribe();
    execute("LISTEN postwire", &mut conn).await?;
    execute("NOTIFY postwire, 'hello'", &mut conn).await?;

    match sub.try_recv() {
        Some(AsyncMessage::Notification(n)) => assert_eq!(n.payload.as_str(), "hello"),
        other => panic!("expected notification, found {other:?}"),
    }

    // cancellation
    let token = conn.cancel_token().unwrap();
    let sleep = execute("SELECT pg_sleep(10)", &mut conn);
    let (res, cancel) = tokio::join!(sleep.into_future(), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel().await
    });
    cancel?;
    let err = res.unwrap_err();
    assert_eq!(err.as_database().map(|e| e.code()), Some("57014"));

    // still usable after the cancelled query
    execute("SELECT 1", &mut conn).await?;
    conn.close().await?;

    Ok(())
}
