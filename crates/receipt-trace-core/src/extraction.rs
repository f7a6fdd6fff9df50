//! Extraction model contract: prompt construction and response validation.
//!
//! The [`ExtractionModel`] trait is the boundary to the local inference
//! service. This module owns everything about that exchange that does not
//! touch the network:
//!
//! - [`build_prompt`] embeds the OCR lines and the rule candidates (as hints)
//!   together with the required response schema.
//! - [`parse_model_content`] validates the model's reply against that schema
//!   and produces a [`ModelResponse`].
//!
//! # Response schema
//!
//! ```json
//! {
//!   "merchant":     {"value": "WALMART", "evidence": {"line_index": 0, "line_text": "WALMART"}},
//!   "date":         {"value": "2010-08-20"},
//!   "total_amount": {"value": 6.41, "evidence": null},
//!   "currency":     null
//! }
//! ```
//!
//! Keys must be field kinds; a missing key means `null`. Each entry is `null`
//! or an object with `value` (string or number) and an optional `evidence`.
//! Anything else is an [`ExtractionError::SchemaViolation`]; nothing is
//! coerced. Evidence is carried exactly as the model returned it and is never
//! synthesized or dropped.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::ExtractionError;
use crate::models::{FieldKind, RuleCandidate};

/// A model-supplied justification for an extracted value.
///
/// Always a non-null JSON value, typically `{"line_index": 3, "line_text": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Evidence(Value);

impl Evidence {
    /// Wrap a JSON value; `null` is not evidence.
    pub fn new(value: Value) -> Option<Self> {
        if value.is_null() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn line_index(&self) -> Option<u64> {
        self.0.get("line_index").and_then(Value::as_u64)
    }

    pub fn line_text(&self) -> Option<&str> {
        self.0.get("line_text").and_then(Value::as_str)
    }
}

/// The model's answer for one field kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelField {
    Absent,
    PresentWithoutEvidence { value: String },
    PresentWithEvidence { value: String, evidence: Evidence },
}

static ABSENT: ModelField = ModelField::Absent;

impl ModelField {
    pub fn value(&self) -> Option<&str> {
        match self {
            ModelField::Absent => None,
            ModelField::PresentWithoutEvidence { value }
            | ModelField::PresentWithEvidence { value, .. } => Some(value),
        }
    }

    pub fn evidence(&self) -> Option<&Evidence> {
        match self {
            ModelField::PresentWithEvidence { evidence, .. } => Some(evidence),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, ModelField::Absent)
    }
}

/// A validated model reply plus the exact text it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    fields: BTreeMap<FieldKind, ModelField>,
    raw: String,
}

impl ModelResponse {
    pub fn new(fields: BTreeMap<FieldKind, ModelField>, raw: impl Into<String>) -> Self {
        Self {
            fields,
            raw: raw.into(),
        }
    }

    /// A response in which the model reported nothing for any field.
    pub fn empty(raw: impl Into<String>) -> Self {
        Self::new(BTreeMap::new(), raw)
    }

    pub fn field(&self, kind: FieldKind) -> &ModelField {
        self.fields.get(&kind).unwrap_or(&ABSENT)
    }

    /// Raw model output, byte-for-byte as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// An extraction backend (local LLM service, test double, ...).
///
/// Implementations perform exactly one attempt per call; retry policy
/// belongs to the caller.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Model identifier recorded in run metadata.
    fn model_name(&self) -> &str;

    async fn extract(
        &self,
        ocr_text: &str,
        candidates: &[RuleCandidate],
    ) -> Result<ModelResponse, ExtractionError>;
}

// ============ Prompt ============

/// Chat messages sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPrompt {
    pub system: String,
    pub user: String,
}

const SYSTEM_PROMPT: &str = "You extract structured fields from receipt OCR.\n\
Return ONLY a JSON object matching required_schema, with no markdown.\n\
Use null for a field you cannot determine.\n\
Evidence must cite ocr_lines with a 0-based line_index and the exact line_text.\n\
If you cannot cite a supporting line, omit evidence or set it to null. Never invent evidence.\n";

const EXTRACTION_RULES: &[&str] = &[
    "Do not invent values that are not in ocr_lines.",
    "rule_candidates are hints from pattern matching; use them only when consistent with ocr_lines.",
    "total_amount is the final payable amount, not cash tendered and not change due.",
    "date should be ISO-8601 (YYYY-MM-DD) when the receipt date is unambiguous.",
    "currency should be an ISO 4217 code.",
];

/// Build the system and user messages for one extraction call.
pub fn build_prompt(ocr_text: &str, candidates: &[RuleCandidate]) -> ExtractionPrompt {
    let ocr_lines: Vec<&str> = ocr_text.lines().collect();

    let mut hints: Map<String, Value> = FieldKind::ALL
        .iter()
        .map(|k| (k.as_str().to_string(), Value::Array(Vec::new())))
        .collect();
    for cand in candidates {
        if let Some(Value::Array(list)) = hints.get_mut(cand.field_kind.as_str()) {
            list.push(json!({
                "value": cand.value,
                "line_index": cand.source_span.line_index,
                "line_text": cand.source_span.line_text,
                "pattern_id": cand.pattern_id,
                "confidence": cand.confidence,
            }));
        }
    }

    let entry_schema = json!({
        "value": "string|number",
        "evidence": {"line_index": "int", "line_text": "string"},
    });
    let schema: Map<String, Value> = FieldKind::ALL
        .iter()
        .map(|k| (k.as_str().to_string(), json!([entry_schema.clone(), null])))
        .collect();

    let user = json!({
        "ocr_lines": ocr_lines,
        "rule_candidates": hints,
        "required_schema": schema,
        "rules": EXTRACTION_RULES,
    });

    ExtractionPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user: user.to_string(),
    }
}

// ============ Response validation ============

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Validate raw model output and build a [`ModelResponse`].
///
/// `raw` is kept verbatim inside the response for auditing.
pub fn parse_model_content(raw: &str) -> Result<ModelResponse, ExtractionError> {
    let text = strip_code_fence(raw.trim());
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ExtractionError::Parse(format!("model output is not JSON: {}", e)))?;

    let entries = match value {
        Value::Object(entries) => entries,
        other => {
            return Err(ExtractionError::SchemaViolation(format!(
                "expected an object keyed by field kind, got {}",
                json_type(&other)
            )))
        }
    };

    let mut fields = BTreeMap::new();
    for (key, entry) in entries {
        let kind = FieldKind::from_key(&key).ok_or_else(|| {
            ExtractionError::SchemaViolation(format!("unknown field kind '{}'", key))
        })?;
        fields.insert(kind, parse_entry(kind, entry)?);
    }

    Ok(ModelResponse::new(fields, raw))
}

fn parse_entry(kind: FieldKind, entry: Value) -> Result<ModelField, ExtractionError> {
    let mut obj = match entry {
        Value::Null => return Ok(ModelField::Absent),
        Value::Object(obj) => obj,
        other => {
            return Err(ExtractionError::SchemaViolation(format!(
                "{}: expected object or null, got {}",
                kind,
                json_type(&other)
            )))
        }
    };

    if let Some(extra) = obj.keys().find(|k| *k != "value" && *k != "evidence") {
        return Err(ExtractionError::SchemaViolation(format!(
            "{}: unexpected key '{}'",
            kind, extra
        )));
    }

    let raw_value = obj.remove("value").ok_or_else(|| {
        ExtractionError::SchemaViolation(format!("{}: missing 'value'", kind))
    })?;
    let evidence = obj.remove("evidence").and_then(Evidence::new);

    let value = match raw_value {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        // Exact JSON text (`arbitrary_precision`): `6.10` stays "6.10".
        Value::Number(n) => Some(n.to_string()),
        Value::Null => None,
        other => {
            return Err(ExtractionError::SchemaViolation(format!(
                "{}: value must be a string or number, got {}",
                kind,
                json_type(&other)
            )))
        }
    };

    match (value, evidence) {
        (None, None) => Ok(ModelField::Absent),
        (None, Some(_)) => Err(ExtractionError::SchemaViolation(format!(
            "{}: evidence supplied without a value",
            kind
        ))),
        (Some(value), None) => Ok(ModelField::PresentWithoutEvidence { value }),
        (Some(value), Some(evidence)) => Ok(ModelField::PresentWithEvidence { value, evidence }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceSpan;

    #[test]
    fn test_flat_string_is_schema_violation() {
        let err = parse_model_content(r#""WALMART 6.41 USD""#).unwrap_err();
        assert!(matches!(err, ExtractionError::SchemaViolation(_)));
    }

    #[test]
    fn test_array_is_schema_violation() {
        let err = parse_model_content(r#"[{"value": "x"}]"#).unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = parse_model_content(r#"{"merchant": {"value": "ACME""#).unwrap_err();
        assert!(matches!(err, ExtractionError::Parse(_)));
        let err = parse_model_content("Sure! The merchant is ACME.").unwrap_err();
        assert!(matches!(err, ExtractionError::Parse(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_model_content(r#"{"total": {"value": "6.41"}}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::SchemaViolation(ref m) if m.contains("total")));
    }

    #[test]
    fn test_extra_entry_key_rejected() {
        let err =
            parse_model_content(r#"{"merchant": {"value": "ACME", "confidence": 0.9}}"#).unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
    }

    #[test]
    fn test_entry_without_value_rejected() {
        let err = parse_model_content(r#"{"merchant": {"evidence": {"line_index": 0}}}"#).unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
    }

    #[test]
    fn test_scalar_entry_rejected() {
        let err = parse_model_content(r#"{"merchant": "ACME"}"#).unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
    }

    #[test]
    fn test_bool_value_rejected() {
        let err = parse_model_content(r#"{"total_amount": {"value": true}}"#).unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
    }

    #[test]
    fn test_evidence_preserved_verbatim() {
        let raw = r#"{"merchant": {"value": "WALMART", "evidence": {"line_index": 0, "line_text": "WALMART"}}}"#;
        let resp = parse_model_content(raw).unwrap();
        let field = resp.field(FieldKind::Merchant);
        assert_eq!(field.value(), Some("WALMART"));
        let ev = field.evidence().unwrap();
        assert_eq!(ev.line_index(), Some(0));
        assert_eq!(ev.line_text(), Some("WALMART"));
        assert_eq!(resp.raw(), raw);
    }

    #[test]
    fn test_null_evidence_is_absent_evidence() {
        let resp = parse_model_content(r#"{"total_amount": {"value": 6.41, "evidence": null}}"#).unwrap();
        assert_eq!(
            resp.field(FieldKind::TotalAmount),
            &ModelField::PresentWithoutEvidence { value: "6.41".into() }
        );
    }

    #[test]
    fn test_numeric_values_keep_their_json_text() {
        let resp = parse_model_content(
            r#"{"total_amount": {"value": 6.10}, "merchant": {"value": 12.345678901234567891}}"#,
        )
        .unwrap();
        assert_eq!(resp.field(FieldKind::TotalAmount).value(), Some("6.10"));
        assert_eq!(
            resp.field(FieldKind::Merchant).value(),
            Some("12.345678901234567891")
        );
    }

    #[test]
    fn test_missing_and_null_entries_are_absent() {
        let resp = parse_model_content(r#"{"merchant": null, "date": {"value": null}}"#).unwrap();
        for kind in FieldKind::ALL {
            assert_eq!(resp.field(kind), &ModelField::Absent);
        }
    }

    #[test]
    fn test_blank_value_is_absent() {
        let resp = parse_model_content(r#"{"currency": {"value": "  "}}"#).unwrap();
        assert!(!resp.field(FieldKind::Currency).is_present());
    }

    #[test]
    fn test_evidence_without_value_rejected() {
        let err = parse_model_content(
            r#"{"date": {"value": null, "evidence": {"line_index": 4, "line_text": "08/20/10"}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
    }

    #[test]
    fn test_code_fence_tolerated() {
        let raw = "```json\n{\"currency\": {\"value\": \"USD\"}}\n```";
        let resp = parse_model_content(raw).unwrap();
        assert_eq!(resp.field(FieldKind::Currency).value(), Some("USD"));
        assert_eq!(resp.raw(), raw);
    }

    #[test]
    fn test_prompt_embeds_lines_and_candidates() {
        let cand = RuleCandidate::new(
            FieldKind::Currency,
            "USD",
            "symbol",
            0.6,
            SourceSpan {
                line_index: 1,
                line_text: "$6.41".into(),
                start: 0,
                end: 1,
            },
        );
        let prompt = build_prompt("ACME\n$6.41", &[cand]);
        let user: Value = serde_json::from_str(&prompt.user).unwrap();
        assert_eq!(user["ocr_lines"], json!(["ACME", "$6.41"]));
        assert_eq!(user["rule_candidates"]["currency"][0]["value"], "USD");
        assert_eq!(user["rule_candidates"]["merchant"], json!([]));
        assert!(user["required_schema"]["total_amount"].is_array());
        assert!(prompt.system.contains("Never invent evidence"));
    }
}
