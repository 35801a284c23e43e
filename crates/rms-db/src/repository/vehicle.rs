//! # Vehicle Repository
//!
//! Mirrored vehicle records: bulk upsert, offline lookups, and the
//! mark-and-sweep deletion pass.
//!
//! ## Sweep
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Mark-and-Sweep Reconciliation                        │
//! │                                                                         │
//! │  vehicles                 seen_ids (this pass)                          │
//! │  ┌──────────────┐         ┌──────────────┐                              │
//! │  │ v1           │ ◄─────► │ v1           │  keep                        │
//! │  │ v2           │ ◄─────► │ v2           │  keep                        │
//! │  │ v3           │         │              │  DELETE (gone on server)     │
//! │  │ v4 (src A)   │         │              │  DELETE (source A removed)   │
//! │  └──────────────┘         └──────────────┘                              │
//! │                                                                         │
//! │  DELETE FROM vehicles WHERE id NOT IN (SELECT id FROM seen_ids)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lookups
//! Field agents search by the last four plate characters
//! (`registration_suffix`, indexed) or by a chassis fragment
//! (`chassis_number_lowercase`, indexed).

use std::collections::HashMap;

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::DbResult;
use crate::lock::WriteLock;
use crate::repository::seen;
use rms_core::VehicleRecord;

const SELECT_VEHICLE: &str = r#"
    SELECT
        id, vehicle_type, registration_number, registration_suffix,
        chassis_number, chassis_number_lowercase, loan_number, bank_name,
        make, customer_name, address, source_name
    FROM vehicles
"#;

/// Repository for mirrored vehicle records.
#[derive(Debug, Clone)]
pub struct VehicleRepository {
    pool: SqlitePool,
    lock: WriteLock,
}

impl VehicleRepository {
    /// Creates a new VehicleRepository.
    pub fn new(pool: SqlitePool, lock: WriteLock) -> Self {
        VehicleRepository { pool, lock }
    }

    /// Upserts records by id in a single transaction.
    ///
    /// An existing row with the same id has every field replaced.
    ///
    /// ## Returns
    /// Number of records written.
    pub async fn upsert_many(&self, records: &[VehicleRecord]) -> DbResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.acquire("vehicles.upsert_many").await;
        let mut tx = self.pool.begin().await?;
        let written = upsert_records(&mut *tx, records).await?;
        tx.commit().await?;

        debug!(count = written, "Upserted vehicles");
        Ok(written)
    }

    /// Upserts records and marks their ids seen, in one transaction.
    ///
    /// Used by bulk chunk syncs that have no per-source cursor to commit.
    pub async fn upsert_and_mark_seen(&self, records: &[VehicleRecord]) -> DbResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.acquire("vehicles.upsert_and_mark_seen").await;
        let mut tx = self.pool.begin().await?;
        let written = upsert_records(&mut *tx, records).await?;
        seen::insert_ids(&mut *tx, records.iter().map(|r| r.id.as_str())).await?;
        tx.commit().await?;

        Ok(written)
    }

    /// Gets a vehicle by id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<VehicleRecord>> {
        let sql = format!("{SELECT_VEHICLE} WHERE id = ?1");
        let record = sqlx::query_as::<_, VehicleRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Finds vehicles whose plate ends with `suffix`.
    ///
    /// The suffix is canonicalized the same way stored registrations are,
    /// so `"12 34"` matches `"MH12AB1234"`.
    pub async fn search_by_registration_suffix(
        &self,
        suffix: &str,
        limit: u32,
    ) -> DbResult<Vec<VehicleRecord>> {
        let suffix = rms_core::normalize::canonical_registration(suffix);
        if suffix.is_empty() {
            return Ok(Vec::new());
        }

        debug!(suffix = %suffix, limit, "Searching vehicles by registration suffix");

        // Exact 4-char suffix hits the index; shorter input falls back to LIKE.
        let sql = format!(
            "{SELECT_VEHICLE} WHERE registration_suffix = ?1 OR registration_number LIKE '%' || ?1 \
             ORDER BY registration_number LIMIT ?2"
        );
        let records = sqlx::query_as::<_, VehicleRecord>(&sql)
            .bind(&suffix)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Case-insensitive chassis number search (substring match).
    pub async fn search_by_chassis(&self, fragment: &str, limit: u32) -> DbResult<Vec<VehicleRecord>> {
        let fragment = fragment.trim().to_lowercase();
        if fragment.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{SELECT_VEHICLE} WHERE chassis_number_lowercase LIKE '%' || ?1 || '%' \
             ORDER BY chassis_number_lowercase LIMIT ?2"
        );
        let records = sqlx::query_as::<_, VehicleRecord>(&sql)
            .bind(&fragment)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Total number of mirrored vehicles.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of vehicles last written from `source_name`.
    pub async fn count_for_source(&self, source_name: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles WHERE source_name = ?1")
            .bind(source_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Row counts grouped by source.
    pub async fn counts_by_source(&self) -> DbResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT source_name, COUNT(*) FROM vehicles GROUP BY source_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Deletes every vehicle whose id is not in `seen_ids`, then clears the
    /// seen set. Both happen in one transaction.
    ///
    /// ## Returns
    /// Number of deleted vehicles.
    pub async fn sweep_unseen(&self) -> DbResult<u64> {
        let _guard = self.lock.acquire("vehicles.sweep_unseen").await;
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM vehicles WHERE id NOT IN (SELECT id FROM seen_ids)")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM seen_ids").execute(&mut *tx).await?;

        tx.commit().await?;

        info!(deleted, "Swept vehicles absent from the server");
        Ok(deleted)
    }
}

/// Upserts records on an open connection/transaction.
///
/// The caller must hold the [`WriteLock`].
pub(crate) async fn upsert_records(
    conn: &mut SqliteConnection,
    records: &[VehicleRecord],
) -> DbResult<u64> {
    let mut written = 0;

    for record in records {
        written += sqlx::query(
            r#"
            INSERT INTO vehicles (
                id, vehicle_type, registration_number, registration_suffix,
                chassis_number, chassis_number_lowercase, loan_number, bank_name,
                make, customer_name, address, source_name
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                vehicle_type = excluded.vehicle_type,
                registration_number = excluded.registration_number,
                registration_suffix = excluded.registration_suffix,
                chassis_number = excluded.chassis_number,
                chassis_number_lowercase = excluded.chassis_number_lowercase,
                loan_number = excluded.loan_number,
                bank_name = excluded.bank_name,
                make = excluded.make,
                customer_name = excluded.customer_name,
                address = excluded.address,
                source_name = excluded.source_name
            "#,
        )
        .bind(&record.id)
        .bind(&record.vehicle_type)
        .bind(&record.registration_number)
        .bind(&record.registration_suffix)
        .bind(&record.chassis_number)
        .bind(&record.chassis_number_lowercase)
        .bind(&record.loan_number)
        .bind(&record.bank_name)
        .bind(&record.make)
        .bind(&record.customer_name)
        .bind(&record.address)
        .bind(&record.source_name)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }

    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use rms_core::normalize::{normalize_record, RawVehicleRecord, SourceContext};
    use serde_json::json;

    pub(crate) fn vehicle(id: &str, reg: &str, source: &str) -> VehicleRecord {
        let raw = RawVehicleRecord::from(json!({
            "_id": id,
            "regNo": reg,
            "chassisNo": format!("CH{id}"),
            "bank": "BankX"
        }));
        normalize_record(raw, &SourceContext::new(source).with_vehicle_type("four-wheeler")).unwrap()
    }

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_all_fields() {
        let db = db().await;
        let repo = db.vehicles();

        repo.upsert_many(&[vehicle("v1", "MH12AB1234", "a.csv")]).await.unwrap();

        let mut updated = vehicle("v1", "KA01ZZ9999", "b.csv");
        updated.customer_name = "New Owner".into();
        repo.upsert_many(&[updated.clone()]).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.get_by_id("v1").await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_search_by_suffix_and_chassis() {
        let db = db().await;
        let repo = db.vehicles();
        repo.upsert_many(&[
            vehicle("v1", "MH12AB1234", "a.csv"),
            vehicle("v2", "DL3C1234", "a.csv"),
            vehicle("v3", "KA01ZZ9999", "a.csv"),
        ])
        .await
        .unwrap();

        let hits = repo.search_by_registration_suffix("1234", 10).await.unwrap();
        assert_eq!(hits.len(), 2);

        let hits = repo.search_by_chassis("chv3", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "v3");

        assert!(repo.search_by_chassis("  ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_deletes_unseen_and_clears_seen_set() {
        let db = db().await;
        db.vehicles()
            .upsert_many(&[
                vehicle("v1", "R1", "a.csv"),
                vehicle("v2", "R2", "a.csv"),
                vehicle("v3", "R3", "b.csv"),
            ])
            .await
            .unwrap();

        db.seen_ids().add_many(&["v1".to_string()]).await.unwrap();

        let deleted = db.vehicles().sweep_unseen().await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(db.vehicles().count().await.unwrap(), 1);
        assert_eq!(db.seen_ids().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_and_mark_seen() {
        let db = db().await;
        let written = db
            .vehicles()
            .upsert_and_mark_seen(&[vehicle("v1", "R1", ""), vehicle("v2", "R2", "")])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(db.seen_ids().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_counts_by_source() {
        let db = db().await;
        db.vehicles()
            .upsert_many(&[
                vehicle("v1", "R1", "a.csv"),
                vehicle("v2", "R2", "a.csv"),
                vehicle("v3", "R3", "b.csv"),
            ])
            .await
            .unwrap();

        let counts = db.vehicles().counts_by_source().await.unwrap();
        assert_eq!(counts.get("a.csv"), Some(&2));
        assert_eq!(counts.get("b.csv"), Some(&1));
        assert_eq!(db.vehicles().count_for_source("b.csv").await.unwrap(), 1);
    }
}
