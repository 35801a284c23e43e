//! # Seen-Id Repository
//!
//! The mark set for a full mirror pass. Every id stored during the pass is
//! recorded here; [`VehicleRepository::sweep_unseen`] deletes the rest.
//!
//! [`VehicleRepository::sweep_unseen`]: super::vehicle::VehicleRepository::sweep_unseen

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::lock::WriteLock;

/// Repository for the `seen_ids` table.
#[derive(Debug, Clone)]
pub struct SeenIdRepository {
    pool: SqlitePool,
    lock: WriteLock,
}

impl SeenIdRepository {
    pub fn new(pool: SqlitePool, lock: WriteLock) -> Self {
        SeenIdRepository { pool, lock }
    }

    /// Empties the seen set. Called at the start of every full pass.
    pub async fn clear(&self) -> DbResult<u64> {
        let _guard = self.lock.acquire("seen_ids.clear").await;
        let cleared = sqlx::query("DELETE FROM seen_ids")
            .execute(&self.pool)
            .await?
            .rows_affected();
        debug!(cleared, "Cleared seen ids");
        Ok(cleared)
    }

    /// Marks ids as seen. Duplicates are ignored.
    pub async fn add_many(&self, ids: &[String]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.acquire("seen_ids.add_many").await;
        let mut tx = self.pool.begin().await?;
        let added = insert_ids(&mut *tx, ids.iter().map(String::as_str)).await?;
        tx.commit().await?;
        Ok(added)
    }

    /// Marks every local row of `source_name` as seen.
    ///
    /// Used when a source could not be fully walked this pass, so its
    /// existing rows survive the sweep.
    pub async fn protect_source(&self, source_name: &str) -> DbResult<u64> {
        let _guard = self.lock.acquire("seen_ids.protect_source").await;
        let protected = sqlx::query(
            "INSERT OR IGNORE INTO seen_ids (id) SELECT id FROM vehicles WHERE source_name = ?1",
        )
        .bind(source_name)
        .execute(&self.pool)
        .await?
        .rows_affected();

        debug!(source = %source_name, protected, "Protected source rows from sweep");
        Ok(protected)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_ids")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn contains(&self, id: &str) -> DbResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM seen_ids WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

/// Inserts ids on an open connection/transaction. Caller holds the lock.
pub(crate) async fn insert_ids<'a>(
    conn: &mut SqliteConnection,
    ids: impl IntoIterator<Item = &'a str>,
) -> DbResult<u64> {
    let mut added = 0;
    for id in ids {
        added += sqlx::query("INSERT OR IGNORE INTO seen_ids (id) VALUES (?1)")
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};
    use crate::repository::vehicle::tests::vehicle;

    #[tokio::test]
    async fn test_add_many_ignores_duplicates() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seen = db.seen_ids();

        let added = seen
            .add_many(&["a".to_string(), "b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert!(seen.contains("a").await.unwrap());
        assert!(!seen.contains("z").await.unwrap());

        assert_eq!(seen.clear().await.unwrap(), 2);
        assert_eq!(seen.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_protected_source_survives_sweep() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.vehicles()
            .upsert_many(&[
                vehicle("v1", "R1", "keep.csv"),
                vehicle("v2", "R2", "keep.csv"),
                vehicle("v3", "R3", "gone.csv"),
            ])
            .await
            .unwrap();

        assert_eq!(db.seen_ids().protect_source("keep.csv").await.unwrap(), 2);
        assert_eq!(db.vehicles().sweep_unseen().await.unwrap(), 1);
        assert!(db.vehicles().get_by_id("v3").await.unwrap().is_none());
        assert_eq!(db.vehicles().count_for_source("keep.csv").await.unwrap(), 2);
    }
}
