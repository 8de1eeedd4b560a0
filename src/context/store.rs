//! The shared context state and its read/merge operations.

use crate::analysis::AnalysisResult;
use crate::core::{window_cutoff, ContextState, KeyEvent, KeyEventKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What one merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Key events appended
    pub added: usize,
    /// Key info items dropped because their (type, value) was already held
    pub duplicates: usize,
    /// Oldest key events evicted to stay within capacity
    pub evicted: usize,
}

/// Holds the current [`ContextState`].
///
/// Readers get copies. A merge builds the next state from a copy and swaps
/// it in whole, so a reader never sees a half-applied analysis.
#[derive(Debug)]
pub struct ContextStore {
    state: Mutex<Arc<ContextState>>,
    key_event_capacity: usize,
}

impl ContextStore {
    pub fn new(key_event_capacity: usize) -> Self {
        Self {
            state: Mutex::new(Arc::new(ContextState::default())),
            key_event_capacity: key_event_capacity.max(1),
        }
    }

    pub fn key_event_capacity(&self) -> usize {
        self.key_event_capacity
    }

    /// Copy of the current state.
    pub fn get_snapshot(&self) -> ContextState {
        let current = Arc::clone(&*self.lock());
        (*current).clone()
    }

    /// Key events recorded within the trailing `window`, oldest first.
    pub fn get_recent_key_events(&self, window: Duration) -> Vec<KeyEvent> {
        let cutoff = window_cutoff(window);
        let current = Arc::clone(&*self.lock());
        current
            .key_events
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// The `count` newest key events, newest first.
    pub fn latest_key_events(&self, count: usize) -> Vec<KeyEvent> {
        let current = Arc::clone(&*self.lock());
        current.key_events.iter().rev().take(count).cloned().collect()
    }

    /// Apply a successful analysis completed at `at`.
    ///
    /// Activity and application are replaced. Each key info item is appended
    /// unless an event with the same (type, value) is already held,
    /// including one appended earlier in this same merge.
    pub(crate) fn merge(&self, result: &AnalysisResult, at: DateTime<Utc>) -> MergeReport {
        let mut current = self.lock();
        let mut next = (**current).clone();
        let mut report = MergeReport::default();

        next.activity = result.activity.clone();
        next.application = result.application.clone();

        for info in &result.key_info {
            let kind = KeyEventKind::from(info.kind.as_str());
            if next
                .key_events
                .iter()
                .any(|event| event.same_identity(&kind, &info.value))
            {
                report.duplicates += 1;
                continue;
            }

            next.key_events.push(KeyEvent {
                timestamp: at,
                kind,
                value: info.value.clone(),
                context: info.context.clone(),
            });
            report.added += 1;

            // Bounded per insert; an evicted event no longer blocks a re-add.
            if next.key_events.len() > self.key_event_capacity {
                next.key_events.remove(0);
                report.evicted += 1;
            }
        }

        next.last_analysis = Some(at);
        *current = Arc::new(next);
        report
    }

    fn lock(&self) -> MutexGuard<'_, Arc<ContextState>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::KeyInfo;
    use crate::core::{INITIAL_ACTIVITY, INITIAL_APPLICATION};

    fn info(kind: &str, value: &str, context: &str) -> KeyInfo {
        KeyInfo {
            kind: kind.to_string(),
            value: value.to_string(),
            context: context.to_string(),
        }
    }

    fn result(key_info: Vec<KeyInfo>) -> AnalysisResult {
        AnalysisResult {
            activity: "reading email".to_string(),
            application: "Gmail".to_string(),
            key_info,
        }
    }

    #[test]
    fn test_initial_state() {
        let store = ContextStore::new(50);
        let state = store.get_snapshot();
        assert_eq!(state.activity, INITIAL_ACTIVITY);
        assert_eq!(state.application, INITIAL_APPLICATION);
        assert!(state.key_events.is_empty());
        assert!(state.last_analysis.is_none());
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let store = ContextStore::new(50);
        store.merge(&result(vec![info("otp", "123456", "A")]), Utc::now());
        assert_eq!(store.get_snapshot(), store.get_snapshot());
    }

    #[test]
    fn test_duplicates_within_one_result_are_dropped() {
        let store = ContextStore::new(50);
        let report = store.merge(
            &result(vec![
                info("otp", "123456", "A"),
                info("otp", "123456", "B"),
            ]),
            Utc::now(),
        );

        assert_eq!(report.added, 1);
        assert_eq!(report.duplicates, 1);
        let events = store.get_snapshot().key_events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].context, "A");
    }

    #[test]
    fn test_duplicates_across_merges_are_dropped() {
        let store = ContextStore::new(50);
        store.merge(&result(vec![info("email", "a@b.c", "sender")]), Utc::now());
        let report = store.merge(
            &result(vec![
                info("email", "a@b.c", "cc"),
                // same value, different type: distinct
                info("name", "a@b.c", "display name"),
            ]),
            Utc::now(),
        );

        assert_eq!(report.added, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.get_snapshot().key_events.len(), 2);
    }

    #[test]
    fn test_key_events_evict_oldest_first() {
        let store = ContextStore::new(3);
        let items = (0..5)
            .map(|i| info("code", &format!("C{i}"), ""))
            .collect();
        let report = store.merge(&result(items), Utc::now());

        assert_eq!(report.added, 5);
        assert_eq!(report.evicted, 2);
        let values: Vec<String> = store
            .get_snapshot()
            .key_events
            .into_iter()
            .map(|e| e.value)
            .collect();
        assert_eq!(values, vec!["C2", "C3", "C4"]);
    }

    #[test]
    fn test_event_evicted_mid_batch_can_be_added_again() {
        let store = ContextStore::new(2);
        let report = store.merge(
            &result(vec![
                info("code", "A", ""),
                info("code", "B", ""),
                info("code", "C", ""),
                info("code", "A", "seen again"),
            ]),
            Utc::now(),
        );

        assert_eq!(report.added, 4);
        assert_eq!(report.duplicates, 0);
        assert_eq!(report.evicted, 2);
        let events = store.get_snapshot().key_events;
        let values: Vec<&str> = events.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["C", "A"]);
        assert_eq!(events[1].context, "seen again");
    }

    #[test]
    fn test_unknown_tags_are_preserved() {
        let store = ContextStore::new(50);
        store.merge(&result(vec![info("loyalty", "GOLD-7", "")]), Utc::now());
        let event = &store.get_snapshot().key_events[0];
        assert_eq!(event.kind, KeyEventKind::Other("loyalty".to_string()));
        assert_eq!(event.kind.as_str(), "loyalty");
    }

    #[test]
    fn test_recent_and_latest_key_events() {
        let store = ContextStore::new(50);
        let old = Utc::now() - chrono::Duration::minutes(20);
        store.merge(&result(vec![info("otp", "111111", "")]), old);
        store.merge(
            &result(vec![info("otp", "222222", ""), info("url", "x.io", "")]),
            Utc::now(),
        );

        let recent = store.get_recent_key_events(Duration::from_secs(5 * 60));
        let values: Vec<&str> = recent.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["222222", "x.io"]);

        let latest = store.latest_key_events(2);
        assert_eq!(latest[0].value, "x.io");
        assert_eq!(latest[1].value, "222222");
    }
}
