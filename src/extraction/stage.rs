//! Throttled, single-flight OCR over captured frames.

use super::{aggregate_regions, OcrError, TextHistory, TextRecognizer};
use crate::capture::FrameSubscriber;
use crate::core::{FrameRecord, TextRecord};
use crate::transparency::SharedTransparencyLog;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Throttles applied before a frame reaches the OCR engine.
///
/// Both apply; the effective rate is the slower of the two.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    /// Only every Nth offered frame is considered
    pub every_nth_frame: u64,
    /// Minimum time between the starts of two extractions
    pub min_interval: Duration,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            every_nth_frame: 3,
            min_interval: Duration::from_secs(1),
        }
    }
}

/// Why a frame was not recognized. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another extraction was still running
    InFlight,
    /// The minimum interval since the last extraction had not elapsed
    RateLimited,
}

#[derive(Debug)]
pub enum ExtractionOutcome {
    /// Text was found and recorded
    Extracted(TextRecord),
    /// The engine ran but found no text; nothing was recorded
    Empty,
    Skipped(SkipReason),
    Failed(OcrError),
}

impl ExtractionOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ExtractionOutcome::Skipped(_))
    }
}

/// Clears the in-flight flag when an extraction ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Turns frames into deduplicated text records.
pub struct TextExtractionStage {
    recognizer: Arc<dyn TextRecognizer>,
    settings: ExtractionSettings,
    history: TextHistory,
    log: SharedTransparencyLog,
    frames_seen: AtomicU64,
    in_flight: AtomicBool,
    last_started: Mutex<Option<Instant>>,
}

impl TextExtractionStage {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        settings: ExtractionSettings,
        history: TextHistory,
        log: SharedTransparencyLog,
    ) -> Self {
        Self {
            recognizer,
            settings,
            history,
            log,
            frames_seen: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            last_started: Mutex::new(None),
        }
    }

    /// Handle to the records this stage produces.
    pub fn history(&self) -> TextHistory {
        self.history.clone()
    }

    pub fn recent_text(&self, window: Duration) -> Vec<TextRecord> {
        self.history.recent_text(window)
    }

    pub fn combined_text(&self, window: Duration) -> String {
        self.history.combined_text(window)
    }

    pub fn is_extracting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Count an arriving frame and, if it is an Nth frame, start extracting
    /// it in the background.
    ///
    /// Returns the spawned task, or `None` when the frame stride skipped it
    /// or no Tokio runtime is available.
    pub fn offer(self: &Arc<Self>, frame: &FrameRecord) -> Option<JoinHandle<ExtractionOutcome>> {
        let seen = self.frames_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.settings.every_nth_frame.max(1) != 0 {
            return None;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("no async runtime available, frame not extracted");
                return None;
            }
        };

        let stage = Arc::clone(self);
        let frame = frame.clone();
        Some(runtime.spawn(async move { stage.process_frame(&frame).await }))
    }

    /// Recognize one frame, unless an extraction is in flight or the
    /// minimum interval has not elapsed.
    pub async fn process_frame(&self, frame: &FrameRecord) -> ExtractionOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.skip(SkipReason::InFlight);
        }
        let _flight = FlightGuard(&self.in_flight);

        if !self.claim_interval() {
            return self.skip(SkipReason::RateLimited);
        }

        let recognizer = Arc::clone(&self.recognizer);
        let image = Arc::clone(&frame.image);
        let recognized = tokio::task::spawn_blocking(move || recognizer.recognize(&image))
            .await
            .map_err(|e| OcrError::Worker(e.to_string()))
            .and_then(|result| result);

        let regions = match recognized {
            Ok(regions) => regions,
            Err(e) => {
                self.log.record_ocr_failure();
                warn!(engine = self.recognizer.name(), "text extraction failed: {e}");
                return ExtractionOutcome::Failed(e);
            }
        };

        let (text, confidence) = aggregate_regions(&regions);
        if text.trim().is_empty() {
            self.log.record_empty_extraction();
            return ExtractionOutcome::Empty;
        }

        // Records stay in timestamp order even if frames finish out of order.
        let timestamp = match self.history.newest_timestamp() {
            Some(newest) if newest > frame.timestamp => newest,
            _ => frame.timestamp,
        };
        let record = TextRecord {
            timestamp,
            text,
            confidence,
        };

        self.history.push(record.clone());
        self.log.record_extraction();
        debug!(
            chars = record.text.len(),
            confidence = record.confidence,
            "recorded screen text"
        );

        ExtractionOutcome::Extracted(record)
    }

    fn claim_interval(&self) -> bool {
        let mut last_started = self
            .last_started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Instant::now();
        if let Some(last) = *last_started {
            if now.duration_since(last) < self.settings.min_interval {
                return false;
            }
        }
        *last_started = Some(now);
        true
    }

    fn skip(&self, reason: SkipReason) -> ExtractionOutcome {
        self.log.record_extraction_skipped();
        debug!(?reason, "extraction skipped");
        ExtractionOutcome::Skipped(reason)
    }
}

/// Feeds captured frames into a [`TextExtractionStage`].
pub struct ExtractionSubscriber(pub Arc<TextExtractionStage>);

impl FrameSubscriber for ExtractionSubscriber {
    fn on_frame(&self, frame: &FrameRecord) -> anyhow::Result<()> {
        // The spawned task reports its own outcome through logs and counters.
        let _ = self.0.offer(frame);
        Ok(())
    }
}
