//! In-memory [`ReceiptStore`] implementation for tests and dry runs.
//!
//! Records live in a `HashMap` keyed by source hash behind `std::sync::RwLock`.
//! Upserts hold the write lock for the whole read-modify-write, so concurrent
//! upserts of the same hash converge exactly as they do in SQLite.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::error::StoreError;

use super::{ReceiptRecord, ReceiptStore, ReceiptSummary, ReceiptUpsert, UpsertAction, UpsertOutcome};

#[derive(Default)]
struct Inner {
    next_id: i64,
    by_hash: HashMap<String, ReceiptRecord>,
}

/// In-memory receipt store.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend(anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl ReceiptStore for InMemoryStore {
    async fn upsert(&self, receipt: &ReceiptUpsert) -> Result<UpsertOutcome, StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut inner = self.inner.write().map_err(|_| poisoned())?;

        if let Some(existing) = inner.by_hash.get_mut(&receipt.source_hash) {
            existing.source_path = receipt.source_path.clone();
            existing.merchant = receipt.merchant.clone();
            existing.receipt_date = receipt.receipt_date.clone();
            existing.total_amount = receipt.total_amount.clone();
            existing.currency = receipt.currency.clone();
            existing.ocr_text = receipt.ocr_text.clone();
            existing.ocr_json = receipt.ocr_json.clone();
            existing.model_json = receipt.model_json.clone();
            existing.meta_json = receipt.meta_json.clone();
            existing.updated_at = now.max(existing.updated_at + 1);
            return Ok(UpsertOutcome {
                action: UpsertAction::Updated,
                record: existing.clone(),
            });
        }

        inner.next_id += 1;
        let record = ReceiptRecord {
            id: inner.next_id,
            source_hash: receipt.source_hash.clone(),
            source_path: receipt.source_path.clone(),
            merchant: receipt.merchant.clone(),
            receipt_date: receipt.receipt_date.clone(),
            total_amount: receipt.total_amount.clone(),
            currency: receipt.currency.clone(),
            ocr_text: receipt.ocr_text.clone(),
            ocr_json: receipt.ocr_json.clone(),
            model_json: receipt.model_json.clone(),
            meta_json: receipt.meta_json.clone(),
            created_at: now,
            updated_at: now,
        };
        inner
            .by_hash
            .insert(receipt.source_hash.clone(), record.clone());
        Ok(UpsertOutcome {
            action: UpsertAction::Inserted,
            record,
        })
    }

    async fn get(&self, id: i64) -> Result<Option<ReceiptRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.by_hash.values().find(|r| r.id == id).cloned())
    }

    async fn get_by_hash(&self, source_hash: &str) -> Result<Option<ReceiptRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.by_hash.get(source_hash).cloned())
    }

    async fn list(&self, limit: i64) -> Result<Vec<ReceiptSummary>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut records: Vec<&ReceiptRecord> = inner.by_hash.values().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(records
            .into_iter()
            .take(limit.max(0) as usize)
            .map(ReceiptSummary::from)
            .collect())
    }
}
