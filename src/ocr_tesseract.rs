//! Tesseract OCR engine.
//!
//! Runs the `tesseract` command-line tool in TSV mode and turns its word
//! rows into line tokens with pixel boxes and confidences. The binary is
//! probed once on first use (`tesseract --version`, then `--list-langs` to
//! confirm every configured language pack is installed) and the outcome is
//! cached for the life of the process.
//!
//! Images are decoded with the `image` crate before Tesseract sees them, so
//! only unreadable input is a decode error. Once an image has decoded, a
//! failing `tesseract` run is an engine problem and reported as unavailable.

use std::io::ErrorKind;
use std::process::Command;
use std::sync::OnceLock;

use image::ImageFormat;
use receipt_trace_core::error::OcrError;
use receipt_trace_core::models::{BoundingBox, OcrToken};
use receipt_trace_core::ocr::OcrEngine;

use crate::config::OcrConfig;

/// TSV row level for individual words.
const WORD_LEVEL: u32 = 5;

pub struct TesseractEngine {
    binary: String,
    language: String,
    psm: Option<u8>,
    /// Probe outcome: the version line, or why the engine is unusable.
    ready: OnceLock<Result<String, OcrError>>,
}

impl TesseractEngine {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            language: config.language.clone(),
            psm: config.psm,
            ready: OnceLock::new(),
        }
    }

    /// Tesseract version line, once the engine has been probed successfully.
    pub fn version(&self) -> Option<&str> {
        self.ready.get().and_then(|r| r.as_ref().ok()).map(String::as_str)
    }

    fn probe(&self) -> Result<String, OcrError> {
        let output = match Command::new(&self.binary).arg("--version").output() {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OcrError::Unavailable(format!(
                    "{} not found (install tesseract-ocr)",
                    self.binary
                )))
            }
            Err(e) => {
                return Err(OcrError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.binary, e
                )))
            }
        };

        if !output.status.success() {
            return Err(OcrError::Unavailable(format!(
                "{} --version exited with {}",
                self.binary, output.status
            )));
        }

        // Older releases print the version banner on stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let version = stdout
            .lines()
            .chain(stderr.lines())
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("tesseract")
            .to_string();

        self.check_languages()?;
        tracing::info!(binary = %self.binary, %version, language = %self.language, "OCR engine ready");
        Ok(version)
    }

    /// Every `+`-joined language in the configuration must be installed.
    fn check_languages(&self) -> Result<(), OcrError> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .output()
            .map_err(|e| {
                OcrError::Unavailable(format!("failed to run {} --list-langs: {}", self.binary, e))
            })?;
        if !output.status.success() {
            return Err(OcrError::Unavailable(format!(
                "{} --list-langs exited with {}",
                self.binary, output.status
            )));
        }

        // Some releases print the list on stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let installed: Vec<&str> = stdout
            .lines()
            .chain(stderr.lines())
            .filter(|l| !l.starts_with("List of"))
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        match self
            .language
            .split('+')
            .map(str::trim)
            .find(|lang| !installed.contains(lang))
        {
            Some(missing) => Err(OcrError::Unavailable(format!(
                "language '{}' is not installed for {} (have: {})",
                missing,
                self.binary,
                installed.join(", ")
            ))),
            None => Ok(()),
        }
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn ensure_ready(&self) -> Result<(), OcrError> {
        match self.ready.get_or_init(|| self.probe()) {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone()),
        }
    }

    fn recognize_raw(&self, image: &[u8]) -> Result<Vec<OcrToken>, OcrError> {
        let decoded =
            image::load_from_memory(image).map_err(|e| OcrError::Decode(e.to_string()))?;
        tracing::debug!(
            width = decoded.width(),
            height = decoded.height(),
            "decoded receipt image"
        );

        let staged = tempfile::Builder::new()
            .prefix("rtrace-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::Unavailable(format!("failed to create temp file: {}", e)))?;
        decoded
            .save_with_format(staged.path(), ImageFormat::Png)
            .map_err(|e| OcrError::Unavailable(format!("failed to stage image: {}", e)))?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(staged.path())
            .arg("stdout")
            .args(["-l", &self.language]);
        if let Some(psm) = self.psm {
            cmd.args(["--psm", &psm.to_string()]);
        }
        cmd.arg("tsv");

        let output = match cmd.output() {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OcrError::Unavailable(format!("{} not found", self.binary)))
            }
            Err(e) => {
                return Err(OcrError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.binary, e
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Unavailable(format!(
                "tesseract failed: {}",
                stderr.trim()
            )));
        }

        let tokens = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(lines = tokens.len(), "tesseract finished");
        Ok(tokens)
    }
}

type LineKey = (u32, u32, u32, u32);

struct LineAcc {
    key: LineKey,
    words: Vec<String>,
    bbox: BoundingBox,
    conf_sum: f32,
}

/// Group Tesseract TSV word rows into line tokens.
///
/// Words are joined with single spaces; the line box is the union of the
/// word boxes and the confidence is the mean word confidence scaled to
/// `[0, 1]`. Words with confidence `-1` carry no recognition and are
/// skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrToken> {
    let mut lines: Vec<LineAcc> = Vec::new();

    for row in tsv.lines() {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] == "level" {
            continue;
        }
        let nums: Option<Vec<u32>> = cols[..10].iter().map(|c| c.trim().parse().ok()).collect();
        let Some(nums) = nums else {
            continue;
        };
        if nums[0] != WORD_LEVEL {
            continue;
        }
        let Ok(conf) = cols[10].trim().parse::<f32>() else {
            continue;
        };
        let text = cols[11..].join("\t");
        let text = text.trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }

        let key = (nums[1], nums[2], nums[3], nums[4]);
        let bbox = BoundingBox {
            left: nums[6],
            top: nums[7],
            width: nums[8],
            height: nums[9],
        };

        match lines.last_mut() {
            Some(line) if line.key == key => {
                line.words.push(text.to_string());
                line.bbox = line.bbox.union(&bbox);
                line.conf_sum += conf;
            }
            _ => lines.push(LineAcc {
                key,
                words: vec![text.to_string()],
                bbox,
                conf_sum: conf,
            }),
        }
    }

    lines
        .into_iter()
        .map(|line| OcrToken {
            confidence: line.conf_sum / line.words.len() as f32 / 100.0,
            text: line.words.join(" "),
            bbox: line.bbox,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t
4\t1\t1\t1\t1\t0\t20\t10\t200\t30\t-1\t
5\t1\t1\t1\t1\t1\t20\t10\t120\t30\t96.5\tWALMART
5\t1\t1\t1\t1\t2\t150\t12\t70\t26\t90.5\tSUPERCENTER
5\t1\t1\t1\t2\t1\t20\t50\t60\t20\t-1\t
5\t1\t1\t1\t2\t2\t90\t50\t80\t20\t80\tTOTAL
5\t1\t1\t1\t2\t3\t180\t52\t40\t18\t70\t6.41
5\t1\t2\t1\t1\t1\t20\t90\t100\t20\t60\t
";

    #[test]
    fn test_parse_tsv_groups_words_into_lines() {
        let tokens = parse_tsv(TSV);
        assert_eq!(tokens.len(), 2);

        assert_eq!(tokens[0].text, "WALMART SUPERCENTER");
        assert_eq!(
            tokens[0].bbox,
            BoundingBox { left: 20, top: 10, width: 200, height: 30 }
        );
        assert!((tokens[0].confidence - 0.935).abs() < 1e-4);

        assert_eq!(tokens[1].text, "TOTAL 6.41");
        assert!((tokens[1].confidence - 0.75).abs() < 1e-4);
        assert_eq!(tokens[1].bbox.left, 90);
    }

    #[test]
    fn test_parse_tsv_empty_output() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("level\tpage_num\n").is_empty());
    }

    #[test]
    fn test_missing_binary_is_unavailable_and_cached() {
        let engine = TesseractEngine::new(&OcrConfig {
            binary: "rtrace-test-no-such-tesseract".to_string(),
            ..OcrConfig::default()
        });
        let first = engine.ensure_ready().unwrap_err();
        assert!(matches!(first, OcrError::Unavailable(_)));
        let second = engine.ensure_ready().unwrap_err();
        assert_eq!(first, second);
        assert!(engine.version().is_none());
    }

    /// Stand-in `tesseract` that knows `eng` and `osd` and fails every
    /// recognition run.
    #[cfg(unix)]
    fn fake_tesseract(dir: &tempfile::TempDir) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("tesseract");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             case \"$1\" in\n\
             --version) echo \"tesseract 5.3.0\";;\n\
             --list-langs) echo \"List of available languages (2):\"; echo eng; echo osd;;\n\
             *) echo \"Failed loading language 'eng'\" >&2; exit 1;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn png_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4))
            .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_language_pack_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TesseractEngine::new(&OcrConfig {
            binary: fake_tesseract(&dir),
            language: "eng+deu".to_string(),
            ..OcrConfig::default()
        });
        let err = engine.ensure_ready().unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(ref m) if m.contains("'deu'")));
        assert!(engine.version().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_recognition_of_decoded_image_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TesseractEngine::new(&OcrConfig {
            binary: fake_tesseract(&dir),
            language: "eng".to_string(),
            ..OcrConfig::default()
        });
        engine.ensure_ready().unwrap();
        assert_eq!(engine.version(), Some("tesseract 5.3.0"));

        let err = engine.recognize_raw(&png_bytes()).unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(ref m) if m.contains("Failed loading")));
    }

    #[test]
    fn test_undecodable_bytes_are_decode_errors() {
        let engine = TesseractEngine::new(&OcrConfig::default());
        let err = engine.recognize_raw(b"definitely not an image").unwrap_err();
        assert!(matches!(err, OcrError::Decode(_)));
    }
}
