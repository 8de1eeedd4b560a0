//! Text extraction from captured frames.
//!
//! The OCR engine sits behind [`TextRecognizer`]. The
//! [`TextExtractionStage`] decides which frames get recognized (frame stride,
//! minimum interval, single flight) and records the results in a
//! [`TextHistory`].

pub mod history;
pub mod stage;
pub mod tesseract;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

pub use history::{combine_distinct, dedup_key, TextHistory, TextStats, DEDUP_PREFIX_CHARS};
pub use stage::{
    ExtractionOutcome, ExtractionSettings, ExtractionSubscriber, SkipReason, TextExtractionStage,
};
pub use tesseract::TesseractRecognizer;

/// Pixel rectangle of a recognized region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// One piece of text found by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedRegion {
    pub region: Region,
    pub text: String,
    /// Engine confidence in [0, 1]
    pub confidence: f64,
}

/// OCR engine capability.
///
/// Called from a blocking worker thread.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, image: &DynamicImage) -> Result<Vec<RecognizedRegion>, OcrError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR engine `{engine}` failed: {message}")]
    Engine { engine: String, message: String },

    #[error("could not encode frame for OCR: {0}")]
    Encode(String),

    #[error("unreadable OCR output: {0}")]
    Output(String),

    #[error("OCR worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Collapse regions into one `(full_text, mean_confidence)` pair.
///
/// Region texts are joined with single spaces; no regions yields `("", 0.0)`.
pub fn aggregate_regions(regions: &[RecognizedRegion]) -> (String, f64) {
    if regions.is_empty() {
        return (String::new(), 0.0);
    }

    let text = regions
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence = regions.iter().map(|r| r.confidence).collect::<Vec<f64>>().mean();

    (text, confidence.clamp(0.0, 1.0))
}
