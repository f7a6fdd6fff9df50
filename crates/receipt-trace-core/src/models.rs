//! Core data models shared by every pipeline stage.
//!
//! These types represent OCR output, rule candidates, and the field kinds
//! that flow from the OCR adapter through reconciliation into storage.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of receipt fields the pipeline extracts.
///
/// Ordering follows declaration order, so `BTreeMap<FieldKind, _>` iterates
/// merchant, date, total amount, currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Merchant,
    Date,
    TotalAmount,
    Currency,
}

impl FieldKind {
    pub const ALL: [FieldKind; 4] = [
        FieldKind::Merchant,
        FieldKind::Date,
        FieldKind::TotalAmount,
        FieldKind::Currency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Merchant => "merchant",
            FieldKind::Date => "date",
            FieldKind::TotalAmount => "total_amount",
            FieldKind::Currency => "currency",
        }
    }

    /// Parse a wire key. Only the canonical snake_case names are accepted.
    pub fn from_key(key: &str) -> Option<Self> {
        FieldKind::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned pixel box of a recognized text region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = (self.left + self.width).max(other.left + other.width);
        let bottom = (self.top + self.height).max(other.top + other.height);
        BoundingBox {
            left,
            top,
            width: right - left,
            height: bottom - top,
        }
    }
}

/// One recognized line of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub bbox: BoundingBox,
    /// Recognition confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// Normalized OCR output for a single image.
///
/// Immutable once built: tokens are private and the full-text view is
/// computed once at construction. Serializes to the stable `ocr_json`
/// artifact shape `{"lines": [...], "text": "..."}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OcrResult {
    lines: Vec<OcrToken>,
    text: String,
}

impl OcrResult {
    /// Build from already-normalized tokens (see [`crate::ocr::normalize_tokens`]).
    pub(crate) fn from_normalized(lines: Vec<OcrToken>) -> Self {
        let text = lines
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self { lines, text }
    }

    /// Build an OCR result from plain text, one token per non-empty line.
    ///
    /// Boxes are zeroed and confidence is `1.0`. Useful for feeding
    /// pre-transcribed text through the rule generator.
    pub fn from_text(text: &str) -> Self {
        let tokens = text
            .lines()
            .map(|line| OcrToken {
                text: line.to_string(),
                bbox: BoundingBox::default(),
                confidence: 1.0,
            })
            .collect();
        Self::from_normalized(crate::ocr::normalize_tokens(tokens))
    }

    pub fn tokens(&self) -> &[OcrToken] {
        &self.lines
    }

    /// Full text: token texts joined by `\n`.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_texts(&self) -> Vec<&str> {
        self.lines.iter().map(|t| t.text.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Mean token confidence, `None` when there are no tokens.
    pub fn mean_confidence(&self) -> Option<f32> {
        if self.lines.is_empty() {
            return None;
        }
        let sum: f32 = self.lines.iter().map(|t| t.confidence).sum();
        Some(sum / self.lines.len() as f32)
    }
}

/// Where in the OCR text a candidate was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSpan {
    /// 0-based index into [`OcrResult::tokens`].
    pub line_index: usize,
    pub line_text: String,
    /// Byte offsets of the match within `line_text`.
    pub start: usize,
    pub end: usize,
}

/// A field value proposed by a deterministic matcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleCandidate {
    pub field_kind: FieldKind,
    pub value: String,
    pub source_span: SourceSpan,
    pub pattern_id: String,
    pub confidence: f32,
}

impl RuleCandidate {
    pub fn new(
        field_kind: FieldKind,
        value: impl Into<String>,
        pattern_id: impl Into<String>,
        confidence: f32,
        source_span: SourceSpan,
    ) -> Self {
        Self {
            field_kind,
            value: value.into(),
            source_span,
            pattern_id: pattern_id.into(),
            confidence,
        }
    }
}

/// Ordering policy for candidates of equal confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the candidate found earlier in the document.
    #[default]
    EarlierLine,
    /// Prefer the candidate found later in the document.
    LaterLine,
}

impl TieBreak {
    /// Total order placing the preferred candidate first: confidence
    /// descending, then line position per policy.
    pub fn rank(&self, a: &RuleCandidate, b: &RuleCandidate) -> Ordering {
        b.confidence.total_cmp(&a.confidence).then_with(|| {
            let (la, lb) = (a.source_span.line_index, b.source_span.line_index);
            match self {
                TieBreak::EarlierLine => la.cmp(&lb),
                TieBreak::LaterLine => lb.cmp(&la),
            }
        })
    }
}
