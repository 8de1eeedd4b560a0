//! Periodic analysis of recent screen text.

use super::{ContextStore, MergeReport};
use crate::analysis::{build_prompt, parse_analysis, truncate_text, AnalysisError, Analyzer};
use crate::core::StageHandle;
use crate::extraction::TextHistory;
use crate::transparency::SharedTransparencyLog;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Time between cycles
    pub interval: Duration,
    /// Trailing window of text analyzed each cycle
    pub text_window: Duration,
    /// Analysis input is cut to this many characters
    pub max_chars: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            text_window: Duration::from_secs(30),
            max_chars: 4000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    /// No text in the window
    BlankText,
    /// No analysis provider was available at startup
    NoAnalyzer,
}

/// Result of one aggregation cycle. Only `Merged` changes the context state.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipCause),
    Abandoned(AnalysisError),
    Merged(MergeReport),
}

/// State shared between the aggregator handle and its background task.
struct AggregatorCore {
    analyzer: Option<Arc<dyn Analyzer>>,
    history: TextHistory,
    store: Arc<ContextStore>,
    settings: AggregatorSettings,
    log: SharedTransparencyLog,
}

impl AggregatorCore {
    async fn run_cycle(&self) -> CycleOutcome {
        let text = self.history.combined_text(self.settings.text_window);
        self.analyze_text(&text).await
    }

    async fn analyze_text(&self, text: &str) -> CycleOutcome {
        if text.trim().is_empty() {
            debug!("no recent text, skipping analysis");
            return CycleOutcome::Skipped(SkipCause::BlankText);
        }
        let Some(analyzer) = &self.analyzer else {
            return CycleOutcome::Skipped(SkipCause::NoAnalyzer);
        };

        let prompt = build_prompt(&truncate_text(text, self.settings.max_chars));
        let parsed = match analyzer.analyze(&prompt).await {
            Ok(reply) => parse_analysis(&reply),
            Err(e) => Err(e),
        };

        let result = match parsed {
            Ok(result) => result,
            Err(e) => {
                self.log.record_analysis_failed();
                warn!(provider = analyzer.name(), "analysis abandoned: {e}");
                return CycleOutcome::Abandoned(e);
            }
        };

        let report = self.store.merge(&result, Utc::now());
        self.log.record_analysis_completed();
        self.log.record_key_events(report.added as u64);
        info!(
            activity = %result.activity,
            application = %result.application,
            new_key_events = report.added,
            "context updated"
        );

        CycleOutcome::Merged(report)
    }

    async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        let period = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // A cancelled cycle never reaches the merge, so state stays intact.
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = self.run_cycle() => {}
            }
        }

        info!("aggregation loop shutting down");
    }
}

/// Cloneable access to on-demand analysis, for callers that do not own the
/// aggregator (request handlers, the CLI).
#[derive(Clone)]
pub struct AnalysisHandle(Arc<AggregatorCore>);

impl AnalysisHandle {
    /// See [`ContextAggregator::force_analyze`].
    pub async fn force_analyze(&self, text: &str) -> CycleOutcome {
        self.0.analyze_text(text).await
    }

    pub fn store(&self) -> Arc<ContextStore> {
        Arc::clone(&self.0.store)
    }
}

/// Summarizes recent text on a fixed period and merges the results into a
/// [`ContextStore`].
pub struct ContextAggregator {
    core: Arc<AggregatorCore>,
    stage: Option<StageHandle>,
}

impl ContextAggregator {
    /// `analyzer` is `None` when no provider could be configured; cycles are
    /// then skipped and the periodic loop is never started.
    pub fn new(
        analyzer: Option<Arc<dyn Analyzer>>,
        history: TextHistory,
        store: Arc<ContextStore>,
        settings: AggregatorSettings,
        log: SharedTransparencyLog,
    ) -> Self {
        Self {
            core: Arc::new(AggregatorCore {
                analyzer,
                history,
                store,
                settings,
                log,
            }),
            stage: None,
        }
    }

    pub fn has_analyzer(&self) -> bool {
        self.core.analyzer.is_some()
    }

    pub fn store(&self) -> Arc<ContextStore> {
        Arc::clone(&self.core.store)
    }

    pub fn handle(&self) -> AnalysisHandle {
        AnalysisHandle(Arc::clone(&self.core))
    }

    /// One cycle over the trailing text window, now.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.core.run_cycle().await
    }

    /// One cycle over `text`, ignoring the period and the text window.
    pub async fn force_analyze(&self, text: &str) -> CycleOutcome {
        self.core.analyze_text(text).await
    }

    /// Start the periodic loop. The first cycle runs one interval from now.
    ///
    /// Does nothing if already running or if there is no analyzer.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        if !self.has_analyzer() {
            warn!("no analysis provider, context aggregation disabled");
            return;
        }

        info!(
            "started analysis every {:?} over the last {:?} of text",
            self.core.settings.interval, self.core.settings.text_window
        );
        let core = Arc::clone(&self.core);
        self.stage = Some(StageHandle::spawn("aggregation", move |token| {
            core.run(token)
        }));
    }

    pub async fn stop(&mut self, timeout: Duration) {
        if let Some(stage) = self.stage.take() {
            stage.shutdown(timeout).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.stage
            .as_ref()
            .map(|stage| !stage.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TextRecord;
    use crate::transparency::create_shared_log;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies with a fixed result and remembers the prompts it saw.
    struct StubAnalyzer {
        reply: Result<String, AnalysisError>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl StubAnalyzer {
        fn replying(reply: Result<&str, AnalysisError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Analyzer for StubAnalyzer {
        fn name(&self) -> &str {
            "stub"
        }

        async fn analyze(&self, prompt: &str) -> Result<String, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    const BANKING: &str = r#"{"activity":"banking","application":"Bank App","key_info":[{"type":"otp","value":"999111","context":"sms"}]}"#;

    fn aggregator(
        analyzer: Option<Arc<StubAnalyzer>>,
        settings: AggregatorSettings,
    ) -> (ContextAggregator, TextHistory) {
        let history = TextHistory::new(200);
        let aggregator = ContextAggregator::new(
            analyzer.map(|a| a as Arc<dyn Analyzer>),
            history.clone(),
            Arc::new(ContextStore::new(50)),
            settings,
            create_shared_log(),
        );
        (aggregator, history)
    }

    fn push_text(history: &TextHistory, text: &str) {
        history.push(TextRecord {
            timestamp: Utc::now(),
            text: text.to_string(),
            confidence: 0.9,
        });
    }

    #[tokio::test]
    async fn test_blank_window_skips_without_calling() {
        let analyzer = StubAnalyzer::replying(Ok(BANKING));
        let (aggregator, _history) = aggregator(Some(Arc::clone(&analyzer)), Default::default());

        assert_eq!(
            aggregator.run_cycle().await,
            CycleOutcome::Skipped(SkipCause::BlankText)
        );
        assert_eq!(
            aggregator.force_analyze("  \n ").await,
            CycleOutcome::Skipped(SkipCause::BlankText)
        );
        assert_eq!(analyzer.calls(), 0);
        assert!(aggregator.store().get_snapshot().last_analysis.is_none());
    }

    #[tokio::test]
    async fn test_successful_cycle_merges() {
        let analyzer = StubAnalyzer::replying(Ok(BANKING));
        let (aggregator, history) = aggregator(Some(Arc::clone(&analyzer)), Default::default());
        push_text(&history, "Your one-time code is 999111");

        let outcome = aggregator.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Merged(MergeReport { added: 1, .. })));

        let state = aggregator.store().get_snapshot();
        assert_eq!(state.activity, "banking");
        assert_eq!(state.application, "Bank App");
        assert!(state.last_analysis.is_some());
        assert!(analyzer.prompts.lock().unwrap()[0].contains("Your one-time code is 999111"));

        // same key info again is not duplicated
        aggregator.run_cycle().await;
        assert_eq!(aggregator.store().get_snapshot().key_events.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_reply_preserves_state() {
        let analyzer = StubAnalyzer::replying(Ok("Sorry, I can't help with that."));
        let (aggregator, _history) = aggregator(Some(analyzer), Default::default());
        let before = aggregator.store().get_snapshot();

        let outcome = aggregator.handle().force_analyze("some screen text").await;
        assert!(matches!(
            outcome,
            CycleOutcome::Abandoned(AnalysisError::Parse(_))
        ));
        assert_eq!(aggregator.store().get_snapshot(), before);
    }

    #[tokio::test]
    async fn test_transport_error_preserves_state() {
        let analyzer =
            StubAnalyzer::replying(Err(AnalysisError::Transport("connection reset".into())));
        let (aggregator, _history) = aggregator(Some(analyzer), Default::default());
        let before = aggregator.store().get_snapshot();

        assert!(matches!(
            aggregator.force_analyze("some screen text").await,
            CycleOutcome::Abandoned(AnalysisError::Transport(_))
        ));
        assert_eq!(aggregator.store().get_snapshot(), before);
    }

    #[tokio::test]
    async fn test_long_input_is_truncated() {
        let analyzer = StubAnalyzer::replying(Ok(BANKING));
        let settings = AggregatorSettings {
            max_chars: 10,
            ..Default::default()
        };
        let (aggregator, _history) = aggregator(Some(Arc::clone(&analyzer)), settings);

        aggregator.force_analyze("0123456789ABCDEFGHIJ").await;
        let prompt = analyzer.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("---\n0123456789...\n---"));
        assert!(!prompt.contains("ABCDEFGHIJ"));
    }

    #[tokio::test]
    async fn test_without_analyzer_cycles_skip_and_loop_stays_off() {
        let (mut aggregator, history) = aggregator(None, Default::default());
        push_text(&history, "text that would be analyzed");

        assert_eq!(
            aggregator.run_cycle().await,
            CycleOutcome::Skipped(SkipCause::NoAnalyzer)
        );
        aggregator.start();
        assert!(!aggregator.is_running());
    }

    #[tokio::test]
    async fn test_periodic_loop_runs_and_stops() {
        let analyzer = StubAnalyzer::replying(Ok(BANKING));
        let settings = AggregatorSettings {
            interval: Duration::from_millis(40),
            ..Default::default()
        };
        let (mut aggregator, history) = aggregator(Some(Arc::clone(&analyzer)), settings);
        push_text(&history, "Your one-time code is 999111");

        aggregator.start();
        aggregator.start();
        assert!(aggregator.is_running());
        // first cycle is one interval out
        assert_eq!(analyzer.calls(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        aggregator.stop(Duration::from_secs(1)).await;
        aggregator.stop(Duration::from_secs(1)).await;
        assert!(!aggregator.is_running());

        let calls = analyzer.calls();
        assert!(calls >= 2, "only {calls} cycles ran");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(analyzer.calls(), calls);
    }
}
