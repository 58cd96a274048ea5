use crate::error::AppError;
use sqlx::{Connection, PgConnection};

/// Opens a dedicated connection for a single datastore operation.
///
/// Connections are never pooled across cycles; each operation scopes its
/// own connection and drops it when done.
pub async fn open(url: &str) -> Result<PgConnection, AppError> {
    PgConnection::connect(url)
        .await
        .map_err(AppError::unreachable)
}

/// Round-trips `SELECT 1` to prove the datastore is reachable.
pub async fn ping(url: &str) -> Result<(), AppError> {
    let mut conn = open(url).await?;
    sqlx::query("SELECT 1")
        .execute(&mut conn)
        .await
        .map_err(AppError::unreachable)?;
    conn.close().await.ok();
    Ok(())
}
