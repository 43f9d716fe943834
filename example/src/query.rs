use postwire::{Connection, Result};

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    // Execute

    conn.query("CREATE TEMP TABLE postwire(id serial, name text)", &[]).await?;

    let res = conn
        .query("INSERT INTO postwire(name) VALUES($1)", &[&"Deez"])
        .await?;

    assert_eq!(res.rows_affected, 1);

    conn.query("INSERT INTO postwire(name) VALUES('Foo'); INSERT INTO postwire(name) VALUES(NULL)", &[])
        .await?;

    // Queries

    let res = conn.query("SELECT id, name FROM postwire ORDER BY id", &[]).await?;

    assert_eq!(res.row_count, 3);
    assert_eq!(res.command, "SELECT");
    assert_eq!(res.rows[0]["name"], "Deez");
    assert!(res.rows[2]["name"].is_null());

    for row in &res {
        let id = row.try_get::<_, i32>("id")?;
        let name = row.try_get::<_, Option<String>>(1)?;
        tracing::info!(id, ?name);
    }

    let res = conn
        .query("SELECT name FROM postwire WHERE id = $1 AND name IS NOT NULL", &[&2i32])
        .await?;

    assert_eq!(res.first().and_then(|row| row[0].as_str()), Some("Foo"));

    let none: Option<&str> = None;
    let res = conn.query("SELECT $1::text IS NULL AS missing", &[&none]).await?;
    assert!(res.rows[0].try_get::<_, bool>("missing")?);

    // Errors keep the connection usable

    let err = conn.query("SELECT * FROM missing_table", &[]).await.unwrap_err();
    tracing::info!(%err, "expected error");

    conn.query("SELECT 1", &[]).await?;
    conn.close().await?;

    Ok(())
}
