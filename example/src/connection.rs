use std::env::var;
use postwire::{Config, Connection, Result};

pub async fn main() -> Result<()> {
    if let Ok(url) = var("DATABASE_URL") {
        let mut conn = Connection::connect(&Config::parse(&url)?).await?;
        conn.query("SELECT 1", &[]).await?;
        conn.close().await?;
    }

    let mut conn = Connection::connect_env().await?;
    conn.simple_query("SELECT 1").await?;

    tracing::info!(
        server_version = conn.parameter("server_version"),
        tls = conn.is_tls(),
        status = ?conn.transaction_status(),
        "connected",
    );

    conn.close().await?;

    Ok(())
}
