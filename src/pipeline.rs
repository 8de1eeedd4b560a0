//! Composition root: builds every stage from a [`Config`] and owns them.

use crate::analysis::Analyzer;
use crate::capture::{FrameSource, FrameSubscriber, ScreenSource};
use crate::config::{Config, ConfigError};
use crate::context::{AnalysisHandle, ContextAggregator, ContextStore, CycleOutcome};
use crate::core::{BufferStats, ContextState, FrameRecord, KeyEvent};
use crate::extraction::{
    ExtractionSubscriber, TextExtractionStage, TextHistory, TextRecognizer, TextStats,
};
use crate::session::SessionRecord;
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Totals for the current run, printed on shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub frames_captured: u64,
    pub extractions: u64,
    pub analyses_completed: u64,
    pub text_entries: usize,
    pub key_events: usize,
}

/// Buffer occupancy, for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub frames: BufferStats,
    pub text: TextStats,
    pub key_events: usize,
}

/// The capture, extraction and aggregation stages wired together.
///
/// Stages talk only through the frame buffer, the text history and the
/// context store; none holds a reference to another.
pub struct Pipeline {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    frames: FrameSource,
    extraction: Arc<TextExtractionStage>,
    aggregator: ContextAggregator,
    store: Arc<ContextStore>,
    log: SharedTransparencyLog,
    stop_timeout: Duration,
}

impl Pipeline {
    /// Validate `config` and build the stages. Nothing runs until [`start`].
    ///
    /// `analyzer` is `None` when no provider is available; capture and
    /// extraction then run without aggregation.
    ///
    /// [`start`]: Pipeline::start
    pub fn new(
        config: &Config,
        source: Arc<dyn ScreenSource>,
        recognizer: Arc<dyn TextRecognizer>,
        analyzer: Option<Arc<dyn Analyzer>>,
        log: SharedTransparencyLog,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let history = TextHistory::new(config.extraction.text_capacity);
        let extraction = Arc::new(TextExtractionStage::new(
            recognizer,
            config.extraction_settings(),
            history.clone(),
            Arc::clone(&log),
        ));

        let frames = FrameSource::new(source, config.frame_settings(), Arc::clone(&log));
        frames.subscribe(Arc::new(ExtractionSubscriber(Arc::clone(&extraction))));

        let store = Arc::new(ContextStore::new(config.analysis.key_event_capacity));
        let aggregator = ContextAggregator::new(
            analyzer,
            history,
            Arc::clone(&store),
            config.aggregator_settings(),
            Arc::clone(&log),
        );

        Ok(Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            frames,
            extraction,
            aggregator,
            store,
            log,
            stop_timeout: config.stop_timeout,
        })
    }

    /// Start capture and aggregation. Must be called within a Tokio runtime.
    pub fn start(&mut self) {
        self.frames.start();
        self.aggregator.start();
        info!(session = %self.session_id, "pipeline started");
    }

    /// Stop every stage, each bounded by the configured stop timeout.
    pub async fn stop(&mut self) {
        self.frames.stop(self.stop_timeout).await;
        self.aggregator.stop(self.stop_timeout).await;
        info!(session = %self.session_id, "pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.frames.is_running()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn store(&self) -> Arc<ContextStore> {
        Arc::clone(&self.store)
    }

    pub fn snapshot(&self) -> ContextState {
        self.store.get_snapshot()
    }

    pub fn recent_key_events(&self, window: Duration) -> Vec<KeyEvent> {
        self.store.get_recent_key_events(window)
    }

    pub fn text_history(&self) -> TextHistory {
        self.extraction.history()
    }

    pub fn frame_source(&self) -> &FrameSource {
        &self.frames
    }

    pub fn latest_frame(&self) -> Option<FrameRecord> {
        self.frames.latest_frame()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn FrameSubscriber>) {
        self.frames.subscribe(subscriber);
    }

    /// Live frames through a bounded channel, e.g. for a preview.
    pub fn subscribe_frames(&self, capacity: usize) -> Receiver<FrameRecord> {
        self.frames.subscribe_channel(capacity)
    }

    pub fn has_analyzer(&self) -> bool {
        self.aggregator.has_analyzer()
    }

    pub fn analysis_handle(&self) -> AnalysisHandle {
        self.aggregator.handle()
    }

    /// Analyze `text` immediately, outside the periodic schedule.
    pub async fn force_analyze(&self, text: &str) -> CycleOutcome {
        self.aggregator.force_analyze(text).await
    }

    pub fn log(&self) -> SharedTransparencyLog {
        Arc::clone(&self.log)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames: self.frames.stats(),
            text: self.extraction.history().stats(),
            key_events: self.store.get_snapshot().key_events.len(),
        }
    }

    pub fn run_stats(&self) -> RunStats {
        let counters = self.log.stats();
        RunStats {
            frames_captured: counters.frames_captured,
            extractions: counters.extractions,
            analyses_completed: counters.analyses_completed,
            text_entries: self.extraction.history().len(),
            key_events: self.store.get_snapshot().key_events.len(),
        }
    }

    /// Everything worth keeping from this run.
    pub fn session_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id,
            started_at: self.started_at,
            ended_at: Utc::now(),
            state: self.snapshot(),
            stats: self.run_stats(),
        }
    }
}
