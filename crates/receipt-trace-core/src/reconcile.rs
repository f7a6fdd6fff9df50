//! Reconciliation of model output with rule candidates.
//!
//! For each [`FieldKind`], in order of preference:
//!
//! | Step | Condition | Result |
//! |------|-----------|--------|
//! | 1 | model reported a value | model value, evidence exactly as the model gave it |
//! | 2 | some rule candidate exists | best candidate, no evidence |
//! | 3 | otherwise | field absent |
//!
//! Evidence can only enter a [`FinalField`] through [`Provenance::Model`],
//! so a rule fallback can never be presented as model-justified.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::extraction::{Evidence, ModelResponse};
use crate::models::{FieldKind, RuleCandidate, TieBreak};

/// Where a final value came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Provenance {
    Model {
        evidence: Option<Evidence>,
    },
    Rule {
        pattern_id: String,
        line_index: usize,
        confidence: f32,
    },
}

/// One reconciled field value.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalField {
    pub value: String,
    pub provenance: Provenance,
}

impl FinalField {
    /// `"model"` or `"rule"`.
    pub fn source(&self) -> &'static str {
        match self.provenance {
            Provenance::Model { .. } => "model",
            Provenance::Rule { .. } => "rule",
        }
    }

    pub fn evidence(&self) -> Option<&Evidence> {
        match &self.provenance {
            Provenance::Model { evidence } => evidence.as_ref(),
            Provenance::Rule { .. } => None,
        }
    }
}

/// Reconciled fields for one receipt. Kinds without a value are absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FinalFields {
    fields: BTreeMap<FieldKind, FinalField>,
}

impl FinalFields {
    pub fn get(&self, kind: FieldKind) -> Option<&FinalField> {
        self.fields.get(&kind)
    }

    pub fn value(&self, kind: FieldKind) -> Option<&str> {
        self.fields.get(&kind).map(|f| f.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKind, &FinalField)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Serialize)]
struct FieldTrace<'a> {
    source: &'static str,
    value: &'a str,
    evidence: Option<&'a Evidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
}

impl<'a> From<&'a FinalField> for FieldTrace<'a> {
    fn from(field: &'a FinalField) -> Self {
        let (pattern_id, line_index, confidence) = match &field.provenance {
            Provenance::Model { .. } => (None, None, None),
            Provenance::Rule {
                pattern_id,
                line_index,
                confidence,
            } => (Some(pattern_id.as_str()), Some(*line_index), Some(*confidence)),
        };
        FieldTrace {
            source: field.source(),
            value: &field.value,
            evidence: field.evidence(),
            pattern_id,
            line_index,
            confidence,
        }
    }
}

/// Serializes as the `meta_json.fields` trace: every field kind is a key,
/// absent kinds map to `null`, and `evidence` is always written (`null`
/// when the model did not supply it).
impl Serialize for FinalFields {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(FieldKind::ALL.len()))?;
        for kind in FieldKind::ALL {
            let trace = self.fields.get(&kind).map(FieldTrace::from);
            map.serialize_entry(kind.as_str(), &trace)?;
        }
        map.end()
    }
}

/// Merge a validated model response with rule candidates.
///
/// Candidates do not need to be sorted; the best one per kind is chosen
/// with `tie_break`. Never fails.
pub fn reconcile(
    candidates: &[RuleCandidate],
    response: &ModelResponse,
    tie_break: TieBreak,
) -> FinalFields {
    let mut fields = BTreeMap::new();

    for kind in FieldKind::ALL {
        let model = response.field(kind);
        let chosen = if let Some(value) = model.value() {
            Some(FinalField {
                value: value.to_string(),
                provenance: Provenance::Model {
                    evidence: model.evidence().cloned(),
                },
            })
        } else {
            candidates
                .iter()
                .filter(|c| c.field_kind == kind)
                .min_by(|a, b| tie_break.rank(a, b))
                .map(|best| FinalField {
                    value: best.value.clone(),
                    provenance: Provenance::Rule {
                        pattern_id: best.pattern_id.clone(),
                        line_index: best.source_span.line_index,
                        confidence: best.confidence,
                    },
                })
        };

        if let Some(field) = chosen {
            fields.insert(kind, field);
        }
    }

    FinalFields { fields }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::parse_model_content;
    use crate::models::{OcrResult, SourceSpan};
    use crate::rules::{generate, RuleOptions};
    use serde_json::json;

    fn cand(kind: FieldKind, value: &str, pattern: &str, confidence: f32, line: usize) -> RuleCandidate {
        RuleCandidate::new(
            kind,
            value,
            pattern,
            confidence,
            SourceSpan {
                line_index: line,
                line_text: value.to_string(),
                start: 0,
                end: value.len(),
            },
        )
    }

    #[test]
    fn test_model_value_with_evidence_wins() {
        let resp = parse_model_content(
            r#"{"merchant": {"value": "WALMART", "evidence": {"line_index": 0, "line_text": "WALMART"}}}"#,
        )
        .unwrap();
        let cands = vec![cand(FieldKind::Merchant, "SAVE MONEY", "first_text_line", 0.9, 1)];
        let fields = reconcile(&cands, &resp, TieBreak::default());
        let merchant = fields.get(FieldKind::Merchant).unwrap();
        assert_eq!(merchant.value, "WALMART");
        assert_eq!(merchant.source(), "model");
        assert_eq!(merchant.evidence().and_then(|e| e.line_text()), Some("WALMART"));
    }

    #[test]
    fn test_model_value_without_evidence_is_not_backfilled() {
        let resp = parse_model_content(r#"{"total_amount": {"value": "6.41"}}"#).unwrap();
        let cands = vec![cand(FieldKind::TotalAmount, "6.41", "anchor_same_line", 0.9, 7)];
        let fields = reconcile(&cands, &resp, TieBreak::default());
        let total = fields.get(FieldKind::TotalAmount).unwrap();
        assert_eq!(total.source(), "model");
        assert!(total.evidence().is_none());
    }

    #[test]
    fn test_rule_fallback_picks_highest_confidence() {
        let cands = vec![
            cand(FieldKind::Currency, "US$", "qualified_symbol", 0.4, 2),
            cand(FieldKind::Currency, "USD", "iso_code", 0.9, 5),
        ];
        let fields = reconcile(&cands, &ModelResponse::empty("{}"), TieBreak::default());
        let currency = fields.get(FieldKind::Currency).unwrap();
        assert_eq!(currency.value, "USD");
        assert_eq!(currency.source(), "rule");
        assert!(currency.evidence().is_none());
        match &currency.provenance {
            Provenance::Rule { pattern_id, line_index, .. } => {
                assert_eq!(pattern_id, "iso_code");
                assert_eq!(*line_index, 5);
            }
            other => panic!("expected rule provenance, got {:?}", other),
        }
    }

    #[test]
    fn test_fallback_tie_break_policy() {
        let cands = vec![
            cand(FieldKind::Date, "2024-01-02", "mdy_slash", 0.6, 3),
            cand(FieldKind::Date, "2024-05-06", "mdy_slash", 0.6, 9),
        ];
        let empty = ModelResponse::empty("{}");
        let early = reconcile(&cands, &empty, TieBreak::EarlierLine);
        assert_eq!(early.value(FieldKind::Date), Some("2024-01-02"));
        let late = reconcile(&cands, &empty, TieBreak::LaterLine);
        assert_eq!(late.value(FieldKind::Date), Some("2024-05-06"));
    }

    #[test]
    fn test_absence_propagates() {
        let ocr = OcrResult::from_text("");
        let cands = generate(&ocr, &RuleOptions::default());
        assert!(cands.is_empty());
        let resp = parse_model_content(
            r#"{"merchant": null, "date": null, "total_amount": null, "currency": null}"#,
        )
        .unwrap();
        let fields = reconcile(&cands, &resp, TieBreak::default());
        assert!(fields.is_empty());
        let trace = serde_json::to_value(&fields).unwrap();
        assert_eq!(
            trace,
            json!({"merchant": null, "date": null, "total_amount": null, "currency": null})
        );
    }

    #[test]
    fn test_evidence_present_iff_model_supplied_it() {
        let resp = parse_model_content(
            r#"{
                "merchant": {"value": "ACME", "evidence": {"line_index": 0, "line_text": "ACME"}},
                "date": {"value": "2024-03-14"},
                "total_amount": null
            }"#,
        )
        .unwrap();
        let cands = vec![
            cand(FieldKind::TotalAmount, "12.00", "anchor_same_line", 0.85, 4),
            cand(FieldKind::Currency, "EUR", "symbol", 0.6, 4),
        ];
        let fields = reconcile(&cands, &resp, TieBreak::default());
        assert_eq!(fields.len(), 4);
        for (kind, field) in fields.iter() {
            let supplied = resp.field(kind).evidence();
            assert_eq!(field.evidence(), supplied, "evidence mismatch for {}", kind);
        }
    }

    #[test]
    fn test_trace_shape() {
        let resp = parse_model_content(r#"{"merchant": {"value": "ACME"}}"#).unwrap();
        let cands = vec![cand(FieldKind::Currency, "GBP", "symbol", 0.6, 2)];
        let trace = serde_json::to_value(reconcile(&cands, &resp, TieBreak::default())).unwrap();
        assert_eq!(
            trace["merchant"],
            json!({"source": "model", "value": "ACME", "evidence": null})
        );
        assert_eq!(trace["currency"]["source"], "rule");
        assert_eq!(trace["currency"]["evidence"], json!(null));
        assert_eq!(trace["currency"]["pattern_id"], "symbol");
        assert_eq!(trace["currency"]["line_index"], 2);
        assert_eq!(trace["date"], json!(null));
    }
}
