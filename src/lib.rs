//! # Receipt Trace
//!
//! Traceable receipt field extraction. Each receipt image goes through OCR,
//! deterministic rule matching, and a local language model; the results are
//! reconciled so that every stored field is attributable either to a rule
//! match or to a value the model explicitly reported, with evidence carried
//! only when the model supplied it.
//!
//! The runtime-free logic (data model, rules, response schema,
//! reconciliation, store trait) lives in `receipt-trace-core`. This crate
//! provides the concrete engines and the application around them.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │ Tesseract │──▶│   Rules   │──▶│  Ollama   │──▶│ Reconcile │──▶│  SQLite  │
//! │   (OCR)   │   │(candidates)│  │  (model)  │   │           │   │ receipts │
//! └───────────┘   └───────────┘   └───────────┘   └───────────┘   └────┬─────┘
//!                                                                       │
//!                                                   ┌───────────────────┤
//!                                                   ▼                   ▼
//!                                              ┌──────────┐       ┌──────────┐
//!                                              │   CLI    │       │   HTTP   │
//!                                              │ (rtrace) │       │ (read)   │
//!                                              └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and env overrides |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite receipt store |
//! | [`ocr_tesseract`] | Tesseract OCR engine |
//! | [`model_client`] | Ollama extraction client |
//! | [`pipeline`] | Per-receipt orchestration, timeout and retry |
//! | [`inbox`] | Directory walking for batch processing |
//! | [`process`] | `process` / `candidates` commands |
//! | [`get`] | Receipt listing and display |
//! | [`server`] | Read-only HTTP API |

pub mod config;
pub mod db;
pub mod get;
pub mod inbox;
pub mod migrate;
pub mod model_client;
pub mod ocr_tesseract;
pub mod pipeline;
pub mod process;
pub mod server;
pub mod sqlite_store;
