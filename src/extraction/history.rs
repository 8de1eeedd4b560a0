//! Recent recognized text and the deduplicated view used for analysis.

use crate::core::{window_cutoff, BufferStats, TextRecord, TimeWindowBuffer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Characters of a record used to judge whether two records are the same.
pub const DEDUP_PREFIX_CHARS: usize = 50;

/// Identity of a record for deduplication: its first 50 characters
/// (after trimming), lowercased.
///
/// Two long texts sharing a 50-character prefix are treated as the same
/// screen even when they differ later.
pub fn dedup_key(text: &str) -> String {
    text.trim()
        .chars()
        .take(DEDUP_PREFIX_CHARS)
        .collect::<String>()
        .to_lowercase()
}

/// Join the distinct texts of `records`, one per line, first occurrence wins.
pub fn combine_distinct(records: &[TextRecord]) -> String {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();

    for record in records {
        let text = record.text.trim();
        if seen.insert(dedup_key(text)) {
            unique.push(text);
        }
    }

    unique.join("\n")
}

/// Aggregate figures over everything currently held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStats {
    pub entry_count: usize,
    pub total_characters: usize,
    pub avg_confidence: f64,
    pub buffer: BufferStats,
}

/// Shared handle to the bounded text record buffer.
///
/// Cloning is cheap; every clone sees the same records.
#[derive(Debug, Clone)]
pub struct TextHistory {
    buffer: Arc<TimeWindowBuffer<TextRecord>>,
}

impl TextHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(TimeWindowBuffer::new(capacity)),
        }
    }

    pub fn push(&self, record: TextRecord) {
        self.buffer.append(record);
    }

    /// Records from the trailing `window`, oldest first.
    pub fn recent_text(&self, window: Duration) -> Vec<TextRecord> {
        self.buffer.snapshot_since(window_cutoff(window))
    }

    /// Distinct texts from the trailing `window`, newline-joined.
    pub fn combined_text(&self, window: Duration) -> String {
        combine_distinct(&self.recent_text(window))
    }

    pub fn latest(&self) -> Option<TextRecord> {
        self.buffer.latest()
    }

    pub fn newest_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.buffer.newest_timestamp()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn stats(&self) -> TextStats {
        let records = self.buffer.snapshot();
        let total_characters = records.iter().map(|r| r.text.chars().count()).sum();
        let avg_confidence = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.confidence).sum::<f64>() / records.len() as f64
        };

        TextStats {
            entry_count: records.len(),
            total_characters,
            avg_confidence,
            buffer: self.buffer.stats(),
        }
    }
}
