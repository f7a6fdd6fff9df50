//! Receipt processing pipeline.
//!
//! One run per image, strictly sequential:
//!
//! ```text
//! bytes ─▶ sha256 ─▶ OCR (blocking pool) ─▶ rule candidates ─▶ model (timeout + retry)
//!                                                                   │
//!                               store.upsert ◀── reconcile ◀────────┘
//! ```
//!
//! An OCR or model failure ends the run early but is still recorded: the
//! receipt is upserted with no extracted fields, `meta_json.status =
//! "failed"`, the failing stage in `meta_json.error`, and whatever artifacts
//! were produced before the failure. When the image was already stored, a
//! failed re-run only records the failure: the previous fields, model reply,
//! and field trace are kept. Only I/O and storage errors prevent a record
//! from being written; those surface as [`PipelineError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use receipt_trace_core::error::{ExtractionError, OcrError, StageFailure, StoreError};
use receipt_trace_core::extraction::{ExtractionModel, ModelResponse};
use receipt_trace_core::models::{OcrResult, RuleCandidate};
use receipt_trace_core::ocr::OcrAdapter;
use receipt_trace_core::reconcile::{reconcile, FinalFields};
use receipt_trace_core::rules::{self, RuleOptions};
use receipt_trace_core::store::{ReceiptStore, ReceiptUpsert, UpsertAction};

use crate::config::ModelConfig;

/// Failures that prevent a receipt record from being written.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Timeout and retry policy around model calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Per-attempt deadline; expiry counts as `service_unavailable`.
    pub timeout: Duration,
    /// Additional attempts after a transient failure.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
        }
    }

    /// Delay before retry number `retry` (0-based): base doubled per retry,
    /// capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
        }
    }
}

/// Outcome of one receipt run, as reported to the caller.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub record_id: i64,
    pub source_hash: String,
    pub source_path: String,
    pub action: UpsertAction,
    pub status: RunStatus,
    pub fields: FinalFields,
    pub failure: Option<StageFailure>,
    pub model_attempts: u32,
}

/// Wired-up pipeline: OCR engine, model, store, and policies.
pub struct Pipeline {
    ocr: OcrAdapter,
    model: Arc<dyn ExtractionModel>,
    store: Arc<dyn ReceiptStore>,
    rules: RuleOptions,
    retry: RetryPolicy,
}

/// Hex-encoded SHA-256 of the image bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl Pipeline {
    pub fn new(
        ocr: OcrAdapter,
        model: Arc<dyn ExtractionModel>,
        store: Arc<dyn ReceiptStore>,
        rules: RuleOptions,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ocr,
            model,
            store,
            rules,
            retry,
        }
    }

    pub async fn process_file(&self, path: &Path) -> Result<ProcessReport, PipelineError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.process_bytes(bytes, &path.display().to_string()).await
    }

    pub async fn process_bytes(
        &self,
        bytes: Vec<u8>,
        source_path: &str,
    ) -> Result<ProcessReport, PipelineError> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let source_hash = content_hash(&bytes);
        info!(%run_id, %source_path, hash = %source_hash, "processing receipt");

        let mut run = RunState::default();

        match recognize(&self.ocr, bytes).await {
            Ok(ocr) => {
                let candidates = rules::generate(&ocr, &self.rules);
                debug!(lines = ocr.len(), candidates = candidates.len(), "OCR and rules done");

                let (outcome, attempts) = self.extract_with_retry(ocr.text(), &candidates).await;
                run.model_attempts = attempts;
                match outcome {
                    Ok(response) => {
                        run.fields = reconcile(&candidates, &response, self.rules.tie_break);
                        run.model_raw = Some(response.raw().to_string());
                    }
                    Err(e) => {
                        warn!(%source_path, error = %e, "extraction failed");
                        run.failure = Some(StageFailure::from(&e));
                    }
                }
                run.candidates = candidates;
                run.ocr = Some(ocr);
            }
            Err(e) => {
                warn!(%source_path, error = %e, "OCR failed");
                run.failure = Some(StageFailure::from(&e));
            }
        }

        let status = if run.failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Ok
        };

        let meta = json!({
            "run_id": run_id,
            "source_path": source_path,
            "source_hash": source_hash,
            "started_at": started_at.to_rfc3339(),
            "processed_at": Utc::now().to_rfc3339(),
            "status": status.as_str(),
            "ocr_engine": self.ocr.engine_name(),
            "ocr_line_count": run.ocr.as_ref().map(OcrResult::len),
            "ocr_mean_confidence": run.ocr.as_ref().and_then(OcrResult::mean_confidence),
            "rule_candidates": run.candidates,
            "fields": run.fields,
            "error": run.failure,
            "model": {
                "name": self.model.model_name(),
                "attempts": run.model_attempts,
            },
        });

        let mut upsert = ReceiptUpsert::new(
            &source_hash,
            source_path,
            &run.fields,
            run.ocr.as_ref(),
            run.model_raw.as_deref(),
            &meta,
        )?;
        if status == RunStatus::Failed {
            if let Some(previous) = self.store.get_by_hash(&source_hash).await? {
                debug!(id = previous.id, "failed run keeps previous extraction");
                upsert.retain_from(&previous);
            }
        }
        let outcome = self.store.upsert(&upsert).await?;

        info!(
            id = outcome.record.id,
            action = ?outcome.action,
            status = status.as_str(),
            fields = run.fields.len(),
            "receipt stored"
        );

        Ok(ProcessReport {
            record_id: outcome.record.id,
            source_hash,
            source_path: source_path.to_string(),
            action: outcome.action,
            status,
            fields: run.fields,
            failure: run.failure,
            model_attempts: run.model_attempts,
        })
    }

    /// Call the model, retrying transient failures per the retry policy.
    ///
    /// Returns the final outcome and the number of attempts made.
    async fn extract_with_retry(
        &self,
        ocr_text: &str,
        candidates: &[RuleCandidate],
    ) -> (Result<ModelResponse, ExtractionError>, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(
                self.retry.timeout,
                self.model.extract(ocr_text, candidates),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ExtractionError::ServiceUnavailable(format!(
                    "no response within {}s",
                    self.retry.timeout.as_secs_f32()
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempts <= self.retry.max_retries => {
                    let delay = self.retry.backoff(attempts - 1);
                    warn!(attempt = attempts, ?delay, error = %e, "model call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return (other, attempts),
            }
        }
    }
}

#[derive(Default)]
struct RunState {
    ocr: Option<OcrResult>,
    candidates: Vec<RuleCandidate>,
    fields: FinalFields,
    model_raw: Option<String>,
    failure: Option<StageFailure>,
    model_attempts: u32,
}

/// OCR and rule candidates only; nothing is stored.
pub async fn scan(
    ocr: &OcrAdapter,
    bytes: Vec<u8>,
    options: &RuleOptions,
) -> Result<(OcrResult, Vec<RuleCandidate>), OcrError> {
    let result = recognize(ocr, bytes).await?;
    let candidates = rules::generate(&result, options);
    Ok((result, candidates))
}

/// Run OCR on the blocking thread pool.
async fn recognize(adapter: &OcrAdapter, bytes: Vec<u8>) -> Result<OcrResult, OcrError> {
    let adapter = adapter.clone();
    tokio::task::spawn_blocking(move || adapter.recognize(&bytes))
        .await
        .unwrap_or_else(|e| Err(OcrError::Unavailable(format!("OCR task failed: {}", e))))
}

/// Summary of a batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub reports: Vec<ProcessReport>,
    /// Inputs that could not be recorded at all.
    pub errors: Vec<(PathBuf, PipelineError)>,
}

impl BatchSummary {
    pub fn ok_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status == RunStatus::Ok)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.reports.len() - self.ok_count() + self.errors.len()
    }
}

impl Pipeline {
    /// Process inputs one after another, continuing past failures.
    pub async fn process_all(&self, inputs: &[PathBuf]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for path in inputs {
            match self.process_file(path).await {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "receipt not recorded");
                    summary.errors.push((path.clone(), e));
                }
            }
        }
        summary
    }
}
