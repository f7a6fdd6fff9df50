//! Receipt retrieval and listing.
//!
//! Backs the `rtrace list` / `rtrace show` commands. Each call opens its own
//! store from the config; the HTTP server keeps one long-lived store and
//! queries it directly.

use anyhow::{bail, Result};
use serde_json::Value;

use receipt_trace_core::models::FieldKind;
use receipt_trace_core::store::{ReceiptRecord, ReceiptStore, ReceiptSummary};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn list_receipts(config: &Config, limit: i64) -> Result<Vec<ReceiptSummary>> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let rows = store.list(limit).await?;
    pool.close().await;
    Ok(rows)
}

pub async fn get_receipt(config: &Config, id: i64) -> Result<Option<ReceiptRecord>> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let record = store.get(id).await?;
    pool.close().await;
    Ok(record)
}

/// CLI entry point for `rtrace list`.
pub async fn run_list(config: &Config, limit: i64) -> Result<()> {
    let rows = list_receipts(config, limit).await?;
    if rows.is_empty() {
        println!("No receipts.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<7}  {:<24}  {:<10}  {:>10}  {:<4}  {}",
        "ID", "STATUS", "MERCHANT", "DATE", "TOTAL", "CUR", "UPDATED"
    );
    for r in &rows {
        println!(
            "{:>5}  {:<7}  {:<24}  {:<10}  {:>10}  {:<4}  {}",
            r.id,
            r.status.as_deref().unwrap_or("-"),
            truncate(r.merchant.as_deref().unwrap_or("-"), 24),
            r.receipt_date.as_deref().unwrap_or("-"),
            r.total_amount.as_deref().unwrap_or("-"),
            r.currency.as_deref().unwrap_or("-"),
            format_ts_ms(r.updated_at),
        );
    }
    Ok(())
}

/// CLI entry point for `rtrace show`.
pub async fn run_show(config: &Config, id: i64, as_json: bool) -> Result<()> {
    let Some(record) = get_receipt(config, id).await? else {
        bail!("receipt not found: {}", id);
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record.to_json())?);
        return Ok(());
    }

    let meta: Value = serde_json::from_str(&record.meta_json).unwrap_or(Value::Null);

    println!("--- Receipt {} ---", record.id);
    println!("source:       {}", record.source_path);
    println!("sha256:       {}", record.source_hash);
    println!("status:       {}", record.status().as_deref().unwrap_or("-"));
    println!("created_at:   {}", format_ts_ms(record.created_at));
    println!("updated_at:   {}", format_ts_ms(record.updated_at));
    if let Some(err) = meta.get("error").filter(|e| !e.is_null()) {
        println!(
            "error:        [{}] {}",
            err["kind"].as_str().unwrap_or("unknown"),
            err["message"].as_str().unwrap_or("")
        );
    }
    println!();

    println!("--- Fields ---");
    let values = [
        (FieldKind::Merchant, &record.merchant),
        (FieldKind::Date, &record.receipt_date),
        (FieldKind::TotalAmount, &record.total_amount),
        (FieldKind::Currency, &record.currency),
    ];
    for (kind, value) in values {
        let trace = &meta["fields"][kind.as_str()];
        let origin = match trace["source"].as_str() {
            Some("model") if !trace["evidence"].is_null() => format!("model, evidence {}", trace["evidence"]),
            Some("model") => "model, no evidence".to_string(),
            Some("rule") => format!("rule {}", trace["pattern_id"].as_str().unwrap_or("?")),
            _ => String::new(),
        };
        println!(
            "{:<13} {:<24} {}",
            format!("{}:", kind),
            value.as_deref().unwrap_or("-"),
            origin
        );
    }
    println!();

    println!("--- OCR text ---");
    println!("{}", record.ocr_text.as_deref().unwrap_or("(none)"));

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

pub fn format_ts_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}
