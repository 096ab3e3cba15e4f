use postwire::{Connection, FromRow, Result, execute, query_as};

#[derive(Debug, FromRow)]
struct Post {
    id: i32,
    #[postwire(rename = "title")]
    name: String,
    note: Option<String>,
}

#[derive(FromRow)]
struct PostTuple(i32, String);

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    execute("CREATE TEMP TABLE post(id serial, title text, note text)", &mut conn).await?;
    execute("INSERT INTO post(title) VALUES($1)", &mut conn)
        .bind("Deez")
        .await?;

    let posts = query_as::<_, _, Post>("SELECT * FROM post", &mut conn)
        .fetch_all()
        .await?;

    assert_eq!(posts[0].id, 1);
    assert_eq!(posts[0].name, "Deez");
    assert!(posts[0].note.is_none());

    let PostTuple(id, title) = query_as("SELECT id, title FROM post", &mut conn)
        .fetch_one()
        .await?;

    assert_eq!((id, title.as_str()), (1, "Deez"));

    conn.close().await
}
