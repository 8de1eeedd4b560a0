//! Auditable record of what the agent has processed.
//!
//! Only counts are kept here, never screen content, so the log can be shown
//! to the user or persisted without leaking anything it observed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Activity counters for the current run.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Frames captured and buffered
    frames_captured: AtomicU64,
    /// Capture attempts that failed
    capture_failures: AtomicU64,
    /// Extractions that produced a text record
    extractions: AtomicU64,
    /// Extractions that found no text
    empty_extractions: AtomicU64,
    /// Extraction requests skipped by single-flight or rate limiting
    extractions_skipped: AtomicU64,
    /// OCR calls that failed
    ocr_failures: AtomicU64,
    /// Analysis cycles merged into the context
    analyses_completed: AtomicU64,
    /// Analysis cycles abandoned on transport or parse failure
    analyses_failed: AtomicU64,
    /// Key events newly recorded
    key_events_recorded: AtomicU64,
    /// Run start time
    session_start: DateTime<Utc>,
    /// Path for persisting cumulative stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
            extractions: AtomicU64::new(0),
            empty_extractions: AtomicU64::new(0),
            extractions_skipped: AtomicU64::new(0),
            ocr_failures: AtomicU64::new(0),
            analyses_completed: AtomicU64::new(0),
            analyses_failed: AtomicU64::new(0),
            key_events_recorded: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that continues from (and saves back to) `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            debug!("could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction(&self) {
        self.extractions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_extraction(&self) {
        self.empty_extractions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction_skipped(&self) {
        self.extractions_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ocr_failure(&self) {
        self.ocr_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analysis_completed(&self) {
        self.analyses_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analysis_failed(&self) {
        self.analyses_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_events(&self, count: u64) {
        self.key_events_recorded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            extractions: self.extractions.load(Ordering::Relaxed),
            empty_extractions: self.empty_extractions.load(Ordering::Relaxed),
            extractions_skipped: self.extractions_skipped.load(Ordering::Relaxed),
            ocr_failures: self.ocr_failures.load(Ordering::Relaxed),
            analyses_completed: self.analyses_completed.load(Ordering::Relaxed),
            analyses_failed: self.analyses_failed.load(Ordering::Relaxed),
            key_events_recorded: self.key_events_recorded.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for the terminal.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Frames captured: {}\n\
             - Capture failures: {}\n\
             - OCR extractions: {} ({} empty, {} skipped, {} failed)\n\
             - Analyses completed: {} ({} failed)\n\
             - Key events recorded: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - Screen images are held in memory only\n\
             - Recognized text leaves this machine only for analysis",
            stats.frames_captured,
            stats.capture_failures,
            stats.extractions,
            stats.empty_extractions,
            stats.extractions_skipped,
            stats.ocr_failures,
            stats.analyses_completed,
            stats.analyses_failed,
            stats.key_events_recorded,
            stats.session_duration_secs
        )
    }

    /// Save cumulative counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                frames_captured: stats.frames_captured,
                extractions: stats.extractions,
                analyses_completed: stats.analyses_completed,
                key_events_recorded: stats.key_events_recorded,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.frames_captured
                    .store(persisted.frames_captured, Ordering::Relaxed);
                self.extractions
                    .store(persisted.extractions, Ordering::Relaxed);
                self.analyses_completed
                    .store(persisted.analyses_completed, Ordering::Relaxed);
                self.key_events_recorded
                    .store(persisted.key_events_recorded, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the activity counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub extractions: u64,
    pub empty_extractions: u64,
    pub extractions_skipped: u64,
    pub ocr_failures: u64,
    pub analyses_completed: u64,
    pub analyses_failed: u64,
    pub key_events_recorded: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Cumulative counters kept across runs.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    frames_captured: u64,
    extractions: u64,
    analyses_completed: u64,
    key_events_recorded: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
