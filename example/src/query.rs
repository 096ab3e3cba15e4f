use futures::StreamExt;
use postwire::{
    Connection, Result, begin, copy_in, copy_out, execute, pipeline, prepare, query, query_as,
    query_scalar, simple,
};

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    // Execute

    execute("CREATE TEMP TABLE post(id serial, name text)", &mut conn).await?;

    let rows = execute("INSERT INTO post(name) VALUES($1)", &mut conn)
        .bind("Deez")
        .await?;

    execute("INSERT INTO post(name) VALUES('Foo')", &mut conn).await?;

    assert_eq!(rows, 1);

    // Queries

    let datas = query_as::<_, _, (i32, String)>("SELECT * FROM post", &mut conn)
        .fetch_all()
        .await?;

    assert_eq!(datas.len(), 2);

    let (_id, name) = query_as::<_, _, (i32, String)>("SELECT * FROM post ORDER BY id LIMIT 1", &mut conn)
        .fetch_one()
        .await?;

    assert_eq!(name.as_str(), "Deez");

    let data = query_as::<_, _, (i32, String)>("SELECT * FROM post LIMIT 0", &mut conn)
        .fetch_optional()
        .await?;

    assert!(data.is_none());

    let datas = query("SELECT * FROM post ORDER BY id", &mut conn).fetch_all().await?;

    assert_eq!(datas[0].try_get::<_, String>("name")?.as_str(), "Deez");

    let names = query_scalar::<_, _, String>("SELECT name FROM post ORDER BY id", &mut conn)
        .fetch_all()
        .await?;

    assert_eq!(names, ["Deez", "Foo"]);

    // Stream with backpressure

    let mut rows = query_as::<_, _, (i32,)>("SELECT * FROM generate_series(1, 1000)", &mut conn)
        .fetch_size(64)
        .fetch();

    let mut sum = 0;
    while let Some(row) = rows.next().await {
        sum += row?.0;
    }
    drop(rows);

    assert_eq!(sum, 500500);

    // Simple query

    let results = simple("SELECT 1; SELECT 2, 3; UPDATE post SET name = name", &mut conn)
        .results()
        .await?;

    assert_eq!(results.len(), 3);
    assert_eq!(results[1].rows[0].try_get::<_, i32>(1)?, 3);
    assert_eq!(results[2].rows_affected, 2);

    // Pipeline

    let results = pipeline(&mut conn)
        .add("INSERT INTO post(name) VALUES($1)")
        .bind("Bar")
        .add("SELECT foo")
        .add("SELECT count(*) FROM post")
        .run()
        .await?;

    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_err());

    // Prepared statement

    let stmt = prepare("SELECT name FROM post WHERE id = $1", &mut conn).await?;
    for id in 1..3 {
        let name = query_scalar::<_, _, String>(&stmt, &mut conn)
            .bind(id)
            .fetch_optional()
            .await?;
        assert!(name.is_some());
    }
    stmt.close(&mut conn).await?;

    // Transaction

    let mut tx = begin(&mut conn).await?;
    execute("INSERT INTO post(name) VALUES('Foo')", &mut tx).await?;
    tx.commit().await?;

    let tx = begin(&mut conn).await?;
    drop(tx);

    // Copy

    let mut copy = copy_in("COPY post(name) FROM STDIN", &mut conn).await?;
    for i in 0..100 {
        copy.send(format!("copy{i}\n")).await?;
    }
    assert_eq!(copy.finish().await?, 100);

    let mut copy = copy_out("COPY post TO STDOUT", &mut conn).await?;
    let mut lines = 0;
    while let Some(data) = copy.next().await {
        lines += data?.iter().filter(|b| **b == b'\n').count();
    }
    assert_eq!(lines as u64, copy.rows_affected());

    // Error case

    execute("", &mut conn).await.unwrap_err();
    execute("SELECT foo", &mut conn).await.unwrap_err();

    query_as::<_, _, (i32, String)>("SELECT * FROM post LIMIT 0", &mut conn)
        .fetch_one()
        .await
        .unwrap_err();

    conn.close().await
}
