//! OCR adapter and engine abstraction.
//!
//! The [`OcrEngine`] trait is the boundary to an external recognizer
//! (Tesseract, PaddleOCR, a cloud API). Engines are explicitly constructed
//! and injected; they are expected to be shared across many calls behind an
//! `Arc` and to pay their initialization cost once, on the first call to
//! [`OcrEngine::ensure_ready`].
//!
//! [`OcrAdapter`] wraps an engine and normalizes whatever it returns into an
//! [`OcrResult`]. The adapter never retries: a failed call is reported to the
//! caller as a typed [`OcrError`].

use std::sync::Arc;

use crate::error::OcrError;
use crate::models::{OcrResult, OcrToken};

/// An external OCR engine.
///
/// Implementations must be safe for concurrent use: `recognize_raw` takes
/// `&self` and must not mutate shared engine state per call.
pub trait OcrEngine: Send + Sync {
    /// Short engine identifier recorded in run metadata (e.g. `"tesseract"`).
    fn name(&self) -> &str;

    /// Perform one-time initialization if it has not happened yet.
    ///
    /// Called before every recognition; implementations cache the outcome
    /// so only the first call does real work.
    fn ensure_ready(&self) -> Result<(), OcrError>;

    /// Recognize text lines in an encoded image.
    ///
    /// Output does not need to be normalized; the adapter trims text, drops
    /// empty lines, and clamps confidences.
    fn recognize_raw(&self, image: &[u8]) -> Result<Vec<OcrToken>, OcrError>;
}

/// Normalizing front-end over a shared [`OcrEngine`].
#[derive(Clone)]
pub struct OcrAdapter {
    engine: Arc<dyn OcrEngine>,
}

impl OcrAdapter {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Recognize an image. Either a complete result or a typed error.
    pub fn recognize(&self, image: &[u8]) -> Result<OcrResult, OcrError> {
        if image.is_empty() {
            return Err(OcrError::Decode("image is empty".to_string()));
        }
        self.engine.ensure_ready()?;
        let raw = self.engine.recognize_raw(image)?;
        Ok(OcrResult::from_normalized(normalize_tokens(raw)))
    }
}

/// Trim token text, drop empty tokens, and clamp confidence into `[0, 1]`.
///
/// Embedded line breaks become spaces so that one token is always one line
/// of the full-text view. Engine order is preserved. NaN confidences become
/// `0.0`.
pub fn normalize_tokens(tokens: Vec<OcrToken>) -> Vec<OcrToken> {
    tokens
        .into_iter()
        .filter_map(|mut token| {
            if token.text.contains(['\n', '\r']) {
                token.text = token.text.replace(['\n', '\r'], " ");
            }
            let trimmed = token.text.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed.len() != token.text.len() {
                token.text = trimmed.to_string();
            }
            token.confidence = if token.confidence.is_nan() {
                0.0
            } else {
                token.confidence.clamp(0.0, 1.0)
            };
            Some(token)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedEngine {
        tokens: Vec<OcrToken>,
        init_calls: AtomicUsize,
        ready: bool,
    }

    impl CannedEngine {
        fn new(tokens: Vec<OcrToken>) -> Self {
            Self {
                tokens,
                init_calls: AtomicUsize::new(0),
                ready: true,
            }
        }
    }

    impl OcrEngine for CannedEngine {
        fn name(&self) -> &str {
            "canned"
        }

        fn ensure_ready(&self) -> Result<(), OcrError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.ready {
                Ok(())
            } else {
                Err(OcrError::Unavailable("engine offline".into()))
            }
        }

        fn recognize_raw(&self, _image: &[u8]) -> Result<Vec<OcrToken>, OcrError> {
            Ok(self.tokens.clone())
        }
    }

    fn token(text: &str, confidence: f32) -> OcrToken {
        OcrToken {
            text: text.to_string(),
            bbox: BoundingBox::default(),
            confidence,
        }
    }

    #[test]
    fn test_normalize_trims_and_drops_empty() {
        let out = normalize_tokens(vec![token("  WALMART ", 0.9), token("   ", 0.8), token("", 0.1)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "WALMART");
    }

    #[test]
    fn test_normalize_flattens_line_breaks() {
        let out = normalize_tokens(vec![token("GRAND\nTOTAL", 0.9)]);
        assert_eq!(out[0].text, "GRAND TOTAL");
    }

    #[test]
    fn test_normalize_clamps_confidence() {
        let out = normalize_tokens(vec![token("a", 1.7), token("b", -0.2), token("c", f32::NAN)]);
        let confs: Vec<f32> = out.iter().map(|t| t.confidence).collect();
        assert_eq!(confs, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_adapter_builds_full_text() {
        let engine = Arc::new(CannedEngine::new(vec![token("ACME", 0.9), token("TOTAL 4.50", 0.8)]));
        let adapter = OcrAdapter::new(engine.clone());
        let result = adapter.recognize(b"fake image").unwrap();
        assert_eq!(result.text(), "ACME\nTOTAL 4.50");
        assert_eq!(result.len(), 2);
        assert_eq!(adapter.engine_name(), "canned");
    }

    #[test]
    fn test_adapter_rejects_empty_bytes_without_touching_engine() {
        let engine = Arc::new(CannedEngine::new(vec![]));
        let adapter = OcrAdapter::new(engine.clone());
        let err = adapter.recognize(b"").unwrap_err();
        assert_eq!(err.kind(), "ocr_decode_error");
        assert_eq!(engine.init_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_adapter_propagates_unavailable() {
        let mut engine = CannedEngine::new(vec![token("x", 1.0)]);
        engine.ready = false;
        let adapter = OcrAdapter::new(Arc::new(engine));
        let err = adapter.recognize(b"img").unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(_)));
    }

    #[test]
    fn test_empty_engine_output_is_valid_result() {
        let adapter = OcrAdapter::new(Arc::new(CannedEngine::new(vec![])));
        let result = adapter.recognize(b"img").unwrap();
        assert!(result.is_empty());
        assert_eq!(result.text(), "");
    }
}
