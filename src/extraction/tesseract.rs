//! OCR through the `tesseract` command line tool.

use super::{OcrError, RecognizedRegion, Region, TextRecognizer};
use image::{DynamicImage, ImageFormat};
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

/// Runs `tesseract stdin stdout -l <language> tsv` per frame and keeps the
/// word-level rows.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    program: String,
    language: String,
}

impl TesseractRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            program: "tesseract".to_string(),
            language: language.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn engine_error(&self, message: impl Into<String>) -> OcrError {
        OcrError::Engine {
            engine: self.program.clone(),
            message: message.into(),
        }
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("eng")
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<RecognizedRegion>, OcrError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::Encode(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(["stdin", "stdout", "-l", &self.language, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.engine_error(e.to_string()))?;

        // tesseract reads all of stdin before producing output
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&png) {
                // Reap the child so a broken pipe doesn't leave a zombie.
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(self.engine_error(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let tsv = String::from_utf8(output.stdout).map_err(|e| OcrError::Output(e.to_string()))?;
        parse_tsv(&tsv)
    }
}

/// Word rows of tesseract's TSV output.
///
/// Rows with a negative confidence (layout rows) or blank text are dropped.
/// Confidence is rescaled from 0..100 to 0..1.
pub fn parse_tsv(tsv: &str) -> Result<Vec<RecognizedRegion>, OcrError> {
    let mut regions = Vec::new();

    for (line_no, line) in tsv.lines().enumerate() {
        if line_no == 0 && line.starts_with("level") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.splitn(12, '\t').collect();
        if columns.len() < 11 {
            return Err(OcrError::Output(format!(
                "line {}: expected 12 columns, got {}",
                line_no + 1,
                columns.len()
            )));
        }

        let text = columns.get(11).map(|t| t.trim()).unwrap_or("");
        let confidence: f64 = columns[10]
            .trim()
            .parse()
            .map_err(|_| OcrError::Output(format!("line {}: bad confidence", line_no + 1)))?;
        if confidence < 0.0 || text.is_empty() {
            continue;
        }

        let number = |index: usize| -> Result<u32, OcrError> {
            columns[index]
                .trim()
                .parse()
                .map_err(|_| OcrError::Output(format!("line {}: bad geometry", line_no + 1)))
        };

        regions.push(RecognizedRegion {
            region: Region {
                left: number(6)?,
                top: number(7)?,
                width: number(8)?,
                height: number(9)?,
            },
            text: text.to_string(),
            confidence: (confidence / 100.0).clamp(0.0, 1.0),
        });
    }

    Ok(regions)
}
