pub mod models;
pub mod repository;

pub use repository::*;

/// Fresh in-memory database with all migrations applied.
///
/// A single connection keeps every query on the same in-memory database.
#[cfg(test)]
pub async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
