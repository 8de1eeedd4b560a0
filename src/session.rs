//! Session files written on shutdown and the key event export built from
//! them.

use crate::core::{ContextState, KeyEvent};
use crate::pipeline::RunStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

const SESSION_PREFIX: &str = "session_";

/// Final state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub state: ContextState,
    pub stats: RunStats,
}

/// Write `record` to `dir/session_<timestamp>_<session id>.json`.
pub fn write_session(dir: &Path, record: &SessionRecord) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "{SESSION_PREFIX}{}_{}.json",
        record.ended_at.format("%Y%m%d_%H%M%S"),
        record.session_id.simple()
    ));

    let json = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Every readable session file in `dir`, oldest first. Other files are
/// ignored.
pub fn load_sessions(dir: &Path) -> Vec<SessionRecord> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut sessions: Vec<SessionRecord> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().map(|e| e == "json").unwrap_or(false)
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(SESSION_PREFIX))
                    .unwrap_or(false)
        })
        .filter_map(|path| {
            let content = std::fs::read_to_string(&path).ok()?;
            match serde_json::from_str(&content) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("skipping unreadable session file {path:?}: {e}");
                    None
                }
            }
        })
        .collect();

    sessions.sort_by_key(|s| s.started_at);
    sessions
}

/// Key events of all `sessions`, oldest first, each (type, value) once.
pub fn collect_key_events(sessions: &[SessionRecord]) -> Vec<KeyEvent> {
    let mut events: Vec<KeyEvent> = sessions
        .iter()
        .flat_map(|s| s.state.key_events.iter().cloned())
        .collect();
    events.sort_by_key(|e| e.timestamp);

    let mut seen = HashSet::new();
    events.retain(|e| seen.insert((e.kind.clone(), e.value.clone())));
    events
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    JsonLines,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::JsonLines => "jsonl",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "jsonl" => Ok(ExportFormat::JsonLines),
            other => Err(format!("unknown export format `{other}` (expected json or jsonl)")),
        }
    }
}

/// Write `events` to `path` in `format`.
pub fn write_key_events(
    path: &Path,
    events: &[KeyEvent],
    format: ExportFormat,
) -> std::io::Result<()> {
    let content = match format {
        ExportFormat::Json => serde_json::to_string_pretty(events).map_err(std::io::Error::other)?,
        ExportFormat::JsonLines => events
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(std::io::Error::other)?
            .join("\n"),
    };
    std::fs::write(path, content)
}
