//! Tesseract adapter
//!
//! Drives the `tesseract` executable with TSV output. Each bitmap is written
//! to a temporary PNG, recognized with the configured segmentation mode and,
//! when confidence stays below the profile threshold, retried with
//! alternative modes up to the configured pass count.

use async_trait::async_trait;
use image::DynamicImage;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, trace};

use super::ocr::{OcrEngine, OcrOutput, OcrOverrides, OcrParameters, OcrProfile};
use crate::error::ScanError;

/// Segmentation modes tried after the configured one:
/// single line, single word, block, raw line
const ALTERNATIVE_PSM: [u8; 4] = [7, 8, 6, 13];

/// OCR engine backed by the tesseract CLI
pub struct TesseractEngine {
    executable: String,
    language: String,
    params: OcrParameters,
    shut_down: bool,
}

impl TesseractEngine {
    pub fn new(executable: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            language: language.into(),
            params: OcrProfile::default().parameters(),
            shut_down: false,
        }
    }

    pub fn parameters(&self) -> &OcrParameters {
        &self.params
    }

    /// Segmentation modes for each pass, configured mode first
    pub fn pass_modes(&self) -> Vec<u8> {
        let mut modes = vec![self.params.page_seg_mode];
        for psm in ALTERNATIVE_PSM {
            if !modes.contains(&psm) {
                modes.push(psm);
            }
        }
        modes.truncate(self.params.passes.max(1) as usize);
        modes
    }

    async fn run_pass(&self, input: &std::path::Path, psm: u8) -> Result<OcrOutput, ScanError> {
        let output = Command::new(&self.executable)
            .arg(input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(psm.to_string())
            .arg("--oem")
            .arg(self.params.engine_mode.to_string())
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", self.params.whitelist))
            .arg("tsv")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ScanError::OcrFailure(format!("failed to run {}: {}", self.executable, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::OcrFailure(format!("tesseract failed: {}", stderr.trim())));
        }

        Ok(parse_tsv_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn configure(&mut self, profile: OcrProfile, overrides: &OcrOverrides) {
        self.params = profile.parameters().with_overrides(overrides);
        debug!(?profile, params = ?self.params, "Tesseract configured");
    }

    async fn recognize(&self, image: &DynamicImage) -> Result<OcrOutput, ScanError> {
        if self.shut_down {
            return Err(ScanError::OcrFailure("engine is shut down".to_string()));
        }

        let image = image.clone();
        let input = tokio::task::spawn_blocking(move || -> Result<NamedTempFile, ScanError> {
            let file = NamedTempFile::with_suffix(".png")?;
            image.save(file.path())?;
            Ok(file)
        })
        .await
        .map_err(|e| ScanError::OcrFailure(e.to_string()))??;

        let mut best: Option<OcrOutput> = None;
        for psm in self.pass_modes() {
            let result = self.run_pass(input.path(), psm).await?;
            trace!(psm, text = %result.text, confidence = result.confidence, "Tesseract pass");

            let good_enough =
                !result.text.is_empty() && result.confidence >= self.params.min_confidence;
            let replace = match &best {
                None => true,
                Some(b) => {
                    !result.text.is_empty()
                        && (b.text.is_empty() || result.confidence > b.confidence)
                }
            };
            if replace {
                best = Some(result);
            }
            if good_enough {
                break;
            }
        }

        Ok(best.unwrap_or_default())
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }
}

/// Parse tesseract TSV into text and mean word confidence.
///
/// Words (level 5) on the same line are joined with spaces, lines with
/// newlines. Confidence is scaled from 0-100 to 0.0-1.0.
pub fn parse_tsv_output(tsv: &str) -> OcrOutput {
    let mut lines: Vec<Vec<&str>> = Vec::new();
    let mut current_line: Option<(i32, i32, i32)> = None;
    let mut conf_sum = 0.0f32;
    let mut word_count = 0usize;

    for line in tsv.lines().skip(1) {
        // level, page_num, block_num, par_num, line_num, word_num,
        // left, top, width, height, conf, text
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = fields[0].parse().unwrap_or(-1);
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();
        if level != 5 || text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        if current_line != Some(key) {
            lines.push(Vec::new());
            current_line = Some(key);
        }
        if let Some(words) = lines.last_mut() {
            words.push(text);
        }
        conf_sum += conf;
        word_count += 1;
    }

    let text = lines
        .iter()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    let confidence = if word_count > 0 {
        (conf_sum / word_count as f32 / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    OcrOutput { text, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\t\
                          left\ttop\twidth\theight\tconf\ttext";

    fn row(level: u8, line: u8, word: u8, conf: &str, text: &str) -> String {
        format!("{level}\t1\t1\t1\t{line}\t{word}\t0\t0\t10\t10\t{conf}\t{text}")
    }

    #[test]
    fn test_parse_single_word() {
        let tsv = [
            HEADER.to_string(),
            row(4, 1, 0, "-1", ""),
            row(5, 1, 1, "91.5", "0815"),
        ]
        .join("\n");
        let out = parse_tsv_output(&tsv);
        assert_eq!(out.text, "0815");
        assert!((out.confidence - 0.915).abs() < 0.001);
    }

    #[test]
    fn test_parse_groups_lines() {
        let tsv = [
            HEADER.to_string(),
            row(5, 1, 1, "80", "12"),
            row(5, 1, 2, "60", "34"),
            row(5, 2, 1, "70", "5678"),
        ]
        .join("\n");
        let out = parse_tsv_output(&tsv);
        assert_eq!(out.text, "12 34\n5678");
        assert!((out.confidence - 0.7).abs() < 0.001);
    }

    #[test]
    fn test_parse_empty_output() {
        let out = parse_tsv_output(HEADER);
        assert!(out.text.is_empty());
        assert_eq!(out.confidence, 0.0);
        assert_eq!(parse_tsv_output(""), OcrOutput::default());
    }

    #[test]
    fn test_pass_modes_follow_profile() {
        let mut engine = TesseractEngine::new("tesseract", "eng");

        engine.configure(OcrProfile::Fast, &OcrOverrides::default());
        assert_eq!(engine.pass_modes(), vec![7]);

        engine.configure(OcrProfile::Accurate, &OcrOverrides::default());
        assert_eq!(engine.pass_modes(), vec![6, 7, 8]);
    }

    #[test]
    fn test_configure_is_idempotent() {
        let mut engine = TesseractEngine::new("tesseract", "eng");
        let overrides = OcrOverrides {
            page_seg_mode: Some(13),
            ..Default::default()
        };
        engine.configure(OcrProfile::Balanced, &overrides);
        let first = engine.parameters().clone();
        engine.configure(OcrProfile::Balanced, &overrides);
        assert_eq!(engine.parameters(), &first);
        assert_eq!(engine.pass_modes(), vec![13, 7]);
    }

    #[tokio::test]
    async fn test_missing_executable_is_ocr_failure() {
        let engine = TesseractEngine::new("/nonexistent/tesseract-binary", "eng");
        let image = DynamicImage::new_luma8(8, 8);
        let err = engine.recognize(&image).await.unwrap_err();
        assert!(matches!(err, ScanError::OcrFailure(_)));
    }

    #[tokio::test]
    async fn test_recognize_after_shutdown_fails() {
        let mut engine = TesseractEngine::new("tesseract", "eng");
        engine.shutdown();
        let err = engine.recognize(&DynamicImage::new_luma8(8, 8)).await.unwrap_err();
        assert!(matches!(err, ScanError::OcrFailure(_)));
    }
}
