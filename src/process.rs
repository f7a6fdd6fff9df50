//! `rtrace process` and `rtrace candidates`.
//!
//! Wires the configured Tesseract engine, Ollama client, and SQLite store
//! into a [`Pipeline`] and reports per-receipt outcomes on stdout.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use receipt_trace_core::models::{FieldKind, OcrResult};
use receipt_trace_core::ocr::OcrAdapter;
use receipt_trace_core::reconcile::FinalFields;
use receipt_trace_core::rules;
use receipt_trace_core::store::ReceiptStore;

use crate::config::Config;
use crate::db;
use crate::inbox::collect_inputs;
use crate::migrate;
use crate::model_client::OllamaExtractor;
use crate::ocr_tesseract::TesseractEngine;
use crate::pipeline::{self, content_hash, Pipeline, ProcessReport, RetryPolicy, RunStatus};
use crate::sqlite_store::SqliteStore;

pub fn build_pipeline(config: &Config, store: Arc<dyn ReceiptStore>) -> Pipeline {
    Pipeline::new(
        OcrAdapter::new(Arc::new(TesseractEngine::new(&config.ocr))),
        Arc::new(OllamaExtractor::new(&config.model)),
        store,
        config.rules,
        RetryPolicy::from_config(&config.model),
    )
}

/// CLI entry point for `rtrace process <path>`.
///
/// Fails (non-zero exit) when any receipt could not be processed cleanly,
/// after every input has been attempted.
pub async fn run_process(config: &Config, path: &Path, dry_run: bool) -> Result<()> {
    let inputs = collect_inputs(path, &config.inbox)?;

    if dry_run {
        println!("Dry run: {} file(s) would be processed", inputs.len());
        for input in &inputs {
            let bytes = std::fs::read(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            println!("  {}  {}", &content_hash(&bytes)[..12], input.display());
        }
        return Ok(());
    }

    if inputs.is_empty() {
        println!("No matching files under {}", path.display());
        return Ok(());
    }

    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store: Arc<dyn ReceiptStore> = Arc::new(SqliteStore::new(pool.clone()));
    let pipeline = build_pipeline(config, store);

    let summary = pipeline.process_all(&inputs).await;
    pool.close().await;

    for report in &summary.reports {
        print_report(report);
    }
    for (path, err) in &summary.errors {
        println!("error   {}: {}", path.display(), err);
    }

    println!(
        "Processed {} file(s): {} ok, {} failed",
        inputs.len(),
        summary.ok_count(),
        summary.failed_count()
    );

    if summary.failed_count() > 0 {
        bail!("{} receipt(s) failed", summary.failed_count());
    }
    Ok(())
}

fn print_report(report: &ProcessReport) {
    match report.status {
        RunStatus::Ok => println!(
            "ok      #{} {} ({:?}) {}",
            report.record_id,
            report.source_path,
            report.action,
            describe_fields(&report.fields)
        ),
        RunStatus::Failed => {
            let (kind, message) = report
                .failure
                .as_ref()
                .map(|f| (f.kind.as_str(), f.message.as_str()))
                .unwrap_or(("unknown", ""));
            println!(
                "failed  #{} {}: {}: {}",
                report.record_id, report.source_path, kind, message
            );
        }
    }
}

fn describe_fields(fields: &FinalFields) -> String {
    FieldKind::ALL
        .iter()
        .map(|kind| match fields.get(*kind) {
            Some(f) => format!("{}={} [{}]", kind, f.value, f.source()),
            None => format!("{}=-", kind),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// CLI entry point for `rtrace candidates <file>`.
///
/// Runs OCR and the rule generator only. With `text = true` the file is
/// read as a plain-text transcription (one line per OCR line) and the OCR
/// engine is not used.
pub async fn run_candidates(config: &Config, file: &Path, text: bool) -> Result<()> {
    let (ocr, candidates) = if text {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let ocr = OcrResult::from_text(&content);
        let candidates = rules::generate(&ocr, &config.rules);
        (ocr, candidates)
    } else {
        let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let adapter = OcrAdapter::new(Arc::new(TesseractEngine::new(&config.ocr)));
        pipeline::scan(&adapter, bytes, &config.rules).await?
    };

    println!("--- OCR ({} lines) ---", ocr.len());
    for (i, token) in ocr.tokens().iter().enumerate() {
        println!("{:>3} [{:.2}] {}", i, token.confidence, token.text);
    }
    println!();

    println!("--- Candidates ({}) ---", candidates.len());
    for c in &candidates {
        println!(
            "{:<13} {:<24} {:.2}  {:<18} line {}",
            c.field_kind.as_str(),
            c.value,
            c.confidence,
            c.pattern_id,
            c.source_span.line_index
        );
    }

    Ok(())
}
