//! # Receipt Trace Core
//!
//! Runtime-free logic for receipt-trace: the data model, OCR output
//! normalization, rule candidate generation, the extraction model response
//! schema, the reconciliation engine, and the receipt store abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP, or process-spawning code. The
//! application crate supplies concrete OCR engines, model clients, and
//! stores through the traits defined here.
//!
//! ```text
//! image ─▶ ocr::OcrAdapter ─▶ rules::generate ─▶ extraction::ExtractionModel
//!                                   │                      │
//!                                   └──────▶ reconcile::reconcile ─▶ store::ReceiptStore
//! ```

pub mod error;
pub mod extraction;
pub mod models;
pub mod ocr;
pub mod reconcile;
pub mod rules;
pub mod store;
