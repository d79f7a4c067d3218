//! Database connection and initialization.

pub use steward_core::db::DatabaseError;

steward_core::define_database!(Database, "Governance database migrations complete");

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = Database::open_in_memory().await;
        assert!(db.is_ok());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn open_file_runs_migrations_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.db");
        drop(Database::open(&path).await.unwrap());
        assert!(Database::open(&path).await.is_ok());
    }
}
