//! SQLite-backed [`ReceiptStore`] implementation.
//!
//! Upserts are a single `INSERT … ON CONFLICT(source_sha) DO UPDATE …
//! RETURNING` statement, so there is no window between "does this hash
//! exist" and "write it" for a concurrent writer to slip into. On update,
//! `updated_at` becomes `MAX(now, previous + 1)` and therefore always
//! advances, even for two runs within the same millisecond.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use receipt_trace_core::error::StoreError;
use receipt_trace_core::store::{
    ReceiptRecord, ReceiptStore, ReceiptSummary, ReceiptUpsert, UpsertAction, UpsertOutcome,
};

const RECORD_COLUMNS: &str = "id, source_sha, source_path, merchant, receipt_date, \
     total_amount, currency, ocr_text, ocr_json, du_json, meta_json, created_at, updated_at";

/// SQLite implementation of the [`ReceiptStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::ConstraintViolation(db.message().to_string())
        }
        _ => StoreError::Backend(anyhow!(err)),
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ReceiptRecord, sqlx::Error> {
    Ok(ReceiptRecord {
        id: row.try_get("id")?,
        source_hash: row.try_get("source_sha")?,
        source_path: row.try_get("source_path")?,
        merchant: row.try_get("merchant")?,
        receipt_date: row.try_get("receipt_date")?,
        total_amount: row.try_get("total_amount")?,
        currency: row.try_get("currency")?,
        ocr_text: row.try_get("ocr_text")?,
        ocr_json: row.try_get("ocr_json")?,
        model_json: row.try_get("du_json")?,
        meta_json: row.try_get("meta_json")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ReceiptStore for SqliteStore {
    async fn upsert(&self, receipt: &ReceiptUpsert) -> Result<UpsertOutcome, StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let sql = format!(
            r#"
            INSERT INTO receipts (source_sha, source_path, merchant, receipt_date,
                                  total_amount, currency, ocr_text, ocr_json, du_json,
                                  meta_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_sha) DO UPDATE SET
                source_path = excluded.source_path,
                merchant = excluded.merchant,
                receipt_date = excluded.receipt_date,
                total_amount = excluded.total_amount,
                currency = excluded.currency,
                ocr_text = excluded.ocr_text,
                ocr_json = excluded.ocr_json,
                du_json = excluded.du_json,
                meta_json = excluded.meta_json,
                updated_at = MAX(excluded.updated_at, receipts.updated_at + 1)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(&receipt.source_hash)
            .bind(&receipt.source_path)
            .bind(&receipt.merchant)
            .bind(&receipt.receipt_date)
            .bind(&receipt.total_amount)
            .bind(&receipt.currency)
            .bind(&receipt.ocr_text)
            .bind(&receipt.ocr_json)
            .bind(&receipt.model_json)
            .bind(&receipt.meta_json)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;

        let record = record_from_row(&row).map_err(map_err)?;
        // A fresh insert is the only path where both timestamps are equal.
        let action = if record.created_at == record.updated_at {
            UpsertAction::Inserted
        } else {
            UpsertAction::Updated
        };

        Ok(UpsertOutcome { action, record })
    }

    async fn get(&self, id: i64) -> Result<Option<ReceiptRecord>, StoreError> {
        let sql = format!("SELECT {} FROM receipts WHERE id = ?", RECORD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(map_err)
    }

    async fn get_by_hash(&self, source_hash: &str) -> Result<Option<ReceiptRecord>, StoreError> {
        let sql = format!("SELECT {} FROM receipts WHERE source_sha = ?", RECORD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(source_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(map_err)
    }

    async fn list(&self, limit: i64) -> Result<Vec<ReceiptSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_path, merchant, receipt_date, total_amount, currency,
                   json_extract(meta_json, '$.status') AS status, updated_at
            FROM receipts
            ORDER BY updated_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.iter()
            .map(|row| {
                Ok(ReceiptSummary {
                    id: row.try_get("id")?,
                    source_path: row.try_get("source_path")?,
                    merchant: row.try_get("merchant")?,
                    receipt_date: row.try_get("receipt_date")?,
                    total_amount: row.try_get("total_amount")?,
                    currency: row.try_get("currency")?,
                    status: row.try_get("status")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(map_err)
    }
}
