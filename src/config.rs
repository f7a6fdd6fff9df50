//! Configuration parsing and validation.
//!
//! `rtrace` reads a TOML file (default `./config/rtrace.toml`). Every section
//! is optional; missing keys fall back to the defaults below. A few values
//! can be overridden from the environment (a `.env` file in the working
//! directory is loaded first):
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `OLLAMA_URL` | `model.url` |
//! | `OLLAMA_MODEL` | `model.model` |
//! | `OCR_LANG` | `ocr.language` |
//!
//! ```toml
//! [db]
//! path = "./data/receipts.sqlite"
//!
//! [ocr]
//! binary = "tesseract"
//! language = "eng"
//! psm = 4
//!
//! [model]
//! url = "http://localhost:11434"
//! model = "llama3.1:8b"
//! temperature = 0.0
//! timeout_secs = 120
//! max_retries = 0
//!
//! [rules]
//! max_candidates_per_kind = 5
//! tie_break = "earlier_line"
//!
//! [inbox]
//! include_globs = ["**/*.jpg", "**/*.jpeg", "**/*.png"]
//! exclude_globs = []
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{Context, Result};
use receipt_trace_core::rules::RuleOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub rules: RuleOptions,
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/receipts.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_binary")]
    pub binary: String,
    #[serde(default = "default_ocr_language")]
    pub language: String,
    /// Tesseract page segmentation mode; engine default when unset.
    #[serde(default)]
    pub psm: Option<u8>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: default_ocr_binary(),
            language: default_ocr_language(),
            psm: None,
        }
    }
}

fn default_ocr_binary() -> String {
    "tesseract".to_string()
}
fn default_ocr_language() -> String {
    "eng".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_url")]
    pub url: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts after a `service_unavailable` failure.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            url: default_model_url(),
            model: default_model_name(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

fn default_model_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model_name() -> String {
    "llama3.1:8b".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct InboxConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.jpg", "**/*.jpeg", "**/*.png", "**/*.tif", "**/*.tiff", "**/*.webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Apply `OLLAMA_URL`, `OLLAMA_MODEL`, and `OCR_LANG` from `lookup`.
///
/// Empty values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(url) = get("OLLAMA_URL") {
        config.model.url = url;
    }
    if let Some(model) = get("OLLAMA_MODEL") {
        config.model.model = model;
    }
    if let Some(lang) = get("OCR_LANG") {
        config.ocr.language = lang;
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.ocr.binary.trim().is_empty() {
        anyhow::bail!("ocr.binary must not be empty");
    }
    if config.ocr.language.trim().is_empty() {
        anyhow::bail!("ocr.language must not be empty");
    }
    if let Some(psm) = config.ocr.psm {
        if psm > 13 {
            anyhow::bail!("ocr.psm must be in [0, 13], got {}", psm);
        }
    }

    if !config.model.url.starts_with("http://") && !config.model.url.starts_with("https://") {
        anyhow::bail!("model.url must be an http(s) URL, got '{}'", config.model.url);
    }
    if config.model.model.trim().is_empty() {
        anyhow::bail!("model.model must not be empty");
    }
    if config.model.timeout_secs == 0 {
        anyhow::bail!("model.timeout_secs must be > 0");
    }
    if !(0.0..=2.0).contains(&config.model.temperature) {
        anyhow::bail!("model.temperature must be in [0.0, 2.0]");
    }

    if config.rules.max_candidates_per_kind == 0 {
        anyhow::bail!("rules.max_candidates_per_kind must be > 0");
    }

    if config.inbox.include_globs.is_empty() {
        anyhow::bail!("inbox.include_globs must not be empty");
    }

    Ok(())
}
