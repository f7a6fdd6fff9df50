//! Storage abstraction for processed receipts.
//!
//! The [`ReceiptStore`] trait is the persistence gateway: one durable
//! [`ReceiptRecord`] per distinct source image, keyed by the SHA-256 of its
//! bytes. Re-processing the same image updates the existing record in place.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::models::{FieldKind, OcrResult};
use crate::reconcile::FinalFields;

/// Everything written by one pipeline run.
///
/// Field columns and JSON artifacts are already rendered to text; the store
/// only assigns the id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptUpsert {
    pub source_hash: String,
    pub source_path: String,
    pub merchant: Option<String>,
    pub receipt_date: Option<String>,
    pub total_amount: Option<String>,
    pub currency: Option<String>,
    pub ocr_text: Option<String>,
    pub ocr_json: Option<String>,
    /// Raw model output, byte-for-byte.
    pub model_json: Option<String>,
    pub meta_json: String,
}

impl ReceiptUpsert {
    /// Assemble an upsert from the artifacts of a run.
    ///
    /// `ocr` and `model_raw` are `None` when the run failed before that
    /// stage produced anything.
    pub fn new(
        source_hash: impl Into<String>,
        source_path: impl Into<String>,
        fields: &FinalFields,
        ocr: Option<&OcrResult>,
        model_raw: Option<&str>,
        meta: &Value,
    ) -> Result<Self, StoreError> {
        let ocr_json = ocr
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Backend(e.into()))?;
        let owned = |kind| fields.value(kind).map(str::to_string);
        Ok(Self {
            source_hash: source_hash.into(),
            source_path: source_path.into(),
            merchant: owned(FieldKind::Merchant),
            receipt_date: owned(FieldKind::Date),
            total_amount: owned(FieldKind::TotalAmount),
            currency: owned(FieldKind::Currency),
            ocr_text: ocr.map(|o| o.text().to_string()),
            ocr_json,
            model_json: model_raw.map(str::to_string),
            meta_json: meta.to_string(),
        })
    }
}

impl ReceiptUpsert {
    /// Carry forward what a failed run could not produce.
    ///
    /// Field columns, the raw model reply, and `meta_json.fields` come from
    /// `previous`; OCR artifacts too when this run has none. The new
    /// `meta_json` (status, error, run ids) is otherwise kept, with
    /// `fields_retained: true` marking the carried-over trace.
    pub fn retain_from(&mut self, previous: &ReceiptRecord) {
        self.merchant = previous.merchant.clone();
        self.receipt_date = previous.receipt_date.clone();
        self.total_amount = previous.total_amount.clone();
        self.currency = previous.currency.clone();
        if self.ocr_text.is_none() {
            self.ocr_text = previous.ocr_text.clone();
            self.ocr_json = previous.ocr_json.clone();
        }
        if self.model_json.is_none() {
            self.model_json = previous.model_json.clone();
        }

        let previous_fields = serde_json::from_str::<Value>(&previous.meta_json)
            .ok()
            .and_then(|mut m| m.get_mut("fields").map(Value::take));
        if let Ok(Value::Object(mut meta)) = serde_json::from_str::<Value>(&self.meta_json) {
            if let Some(fields) = previous_fields {
                meta.insert("fields".to_string(), fields);
            }
            meta.insert("fields_retained".to_string(), Value::Bool(true));
            self.meta_json = Value::Object(meta).to_string();
        }
    }
}

/// A stored receipt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptRecord {
    pub id: i64,
    pub source_hash: String,
    pub source_path: String,
    pub merchant: Option<String>,
    pub receipt_date: Option<String>,
    pub total_amount: Option<String>,
    pub currency: Option<String>,
    pub ocr_text: Option<String>,
    pub ocr_json: Option<String>,
    pub model_json: Option<String>,
    pub meta_json: String,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds; strictly increases on every update.
    pub updated_at: i64,
}

impl ReceiptRecord {
    /// JSON view with the stored artifacts parsed back into JSON.
    ///
    /// An artifact that is not valid JSON (for example a model reply that
    /// failed to parse) is returned as a string.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "source_hash": self.source_hash,
            "source_path": self.source_path,
            "merchant": self.merchant,
            "receipt_date": self.receipt_date,
            "total_amount": self.total_amount,
            "currency": self.currency,
            "ocr_text": self.ocr_text,
            "ocr_json": self.ocr_json.as_deref().map(parse_artifact),
            "model_json": self.model_json.as_deref().map(parse_artifact),
            "meta_json": parse_artifact(&self.meta_json),
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }

    /// `meta_json.status`, if recorded.
    pub fn status(&self) -> Option<String> {
        serde_json::from_str::<Value>(&self.meta_json)
            .ok()
            .and_then(|m| m.get("status").and_then(Value::as_str).map(str::to_string))
    }
}

fn parse_artifact(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Whether an upsert created a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    pub record: ReceiptRecord,
}

/// Listing row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptSummary {
    pub id: i64,
    pub source_path: String,
    pub merchant: Option<String>,
    pub receipt_date: Option<String>,
    pub total_amount: Option<String>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub updated_at: i64,
}

impl From<&ReceiptRecord> for ReceiptSummary {
    fn from(r: &ReceiptRecord) -> Self {
        Self {
            id: r.id,
            source_path: r.source_path.clone(),
            merchant: r.merchant.clone(),
            receipt_date: r.receipt_date.clone(),
            total_amount: r.total_amount.clone(),
            currency: r.currency.clone(),
            status: r.status(),
            updated_at: r.updated_at,
        }
    }
}

/// Abstract receipt store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](ReceiptStore::upsert) | Insert or update the record for a source hash |
/// | [`get`](ReceiptStore::get) | Fetch a record by id |
/// | [`get_by_hash`](ReceiptStore::get_by_hash) | Fetch a record by source hash |
/// | [`list`](ReceiptStore::list) | Newest records first, as summaries |
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Atomically insert or update the record keyed by `source_hash`.
    ///
    /// Concurrent upserts of the same hash converge to one record.
    async fn upsert(&self, receipt: &ReceiptUpsert) -> Result<UpsertOutcome, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<ReceiptRecord>, StoreError>;

    async fn get_by_hash(&self, source_hash: &str) -> Result<Option<ReceiptRecord>, StoreError>;

    /// Most recently updated first.
    async fn list(&self, limit: i64) -> Result<Vec<ReceiptSummary>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::parse_model_content;
    use crate::models::TieBreak;
    use crate::reconcile::reconcile;

    #[test]
    fn test_upsert_from_artifacts() {
        let resp = parse_model_content(r#"{"merchant": {"value": "ACME"}, "total_amount": {"value": 4.5}}"#)
            .unwrap();
        let fields = reconcile(&[], &resp, TieBreak::default());
        let ocr = OcrResult::from_text("ACME\nTOTAL 4.50");
        let meta = serde_json::json!({"status": "ok"});
        let up = ReceiptUpsert::new("abc", "/r/1.jpg", &fields, Some(&ocr), Some(resp.raw()), &meta)
            .unwrap();
        assert_eq!(up.merchant.as_deref(), Some("ACME"));
        assert_eq!(up.total_amount.as_deref(), Some("4.5"));
        assert_eq!(up.receipt_date, None);
        assert_eq!(up.ocr_text.as_deref(), Some("ACME\nTOTAL 4.50"));
        assert_eq!(up.model_json.as_deref(), Some(resp.raw()));
        assert!(up.ocr_json.unwrap().contains("\"lines\""));
    }

    #[test]
    fn test_retain_from_keeps_previous_extraction() {
        let previous = ReceiptRecord {
            id: 1,
            source_hash: "abc".into(),
            source_path: "/r/1.jpg".into(),
            merchant: Some("ACME".into()),
            receipt_date: None,
            total_amount: Some("9.99".into()),
            currency: Some("USD".into()),
            ocr_text: Some("ACME\nTOTAL 9.99".into()),
            ocr_json: Some(r#"{"lines":[],"text":"ACME\nTOTAL 9.99"}"#.into()),
            model_json: Some(r#"{"total_amount": {"value": "9.99"}}"#.into()),
            meta_json: r#"{"status": "ok", "fields": {"total_amount": {"source": "model"}}}"#.into(),
            created_at: 1,
            updated_at: 2,
        };
        let meta = serde_json::json!({"status": "failed", "fields": {}, "error": {"kind": "service_unavailable"}});
        let mut up = ReceiptUpsert::new("abc", "/r/1.jpg", &FinalFields::default(), None, None, &meta)
            .unwrap();
        up.retain_from(&previous);

        assert_eq!(up.total_amount.as_deref(), Some("9.99"));
        assert_eq!(up.merchant.as_deref(), Some("ACME"));
        assert_eq!(up.ocr_text, previous.ocr_text);
        assert_eq!(up.model_json, previous.model_json);
        let merged: Value = serde_json::from_str(&up.meta_json).unwrap();
        assert_eq!(merged["status"], "failed");
        assert_eq!(merged["error"]["kind"], "service_unavailable");
        assert_eq!(merged["fields"]["total_amount"]["source"], "model");
        assert_eq!(merged["fields_retained"], true);
    }

    #[test]
    fn test_record_json_parses_artifacts() {
        let record = ReceiptRecord {
            id: 7,
            source_hash: "abc".into(),
            source_path: "/r/1.jpg".into(),
            merchant: None,
            receipt_date: None,
            total_amount: None,
            currency: None,
            ocr_text: None,
            ocr_json: None,
            model_json: Some("not json".into()),
            meta_json: r#"{"status": "failed"}"#.into(),
            created_at: 1,
            updated_at: 2,
        };
        let json = record.to_json();
        assert_eq!(json["meta_json"]["status"], "failed");
        assert_eq!(json["model_json"], "not json");
        assert!(json["ocr_json"].is_null());
        assert_eq!(record.status().as_deref(), Some("failed"));
    }
}
