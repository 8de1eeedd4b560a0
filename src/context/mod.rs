//! Aggregated context: what the user is doing and what they may need to
//! remember.
//!
//! [`ContextAggregator`] is the only writer; everything else reads
//! [`ContextStore`] snapshots.

pub mod aggregator;
pub mod store;

pub use aggregator::{
    AggregatorSettings, AnalysisHandle, ContextAggregator, CycleOutcome, SkipCause,
};
pub use store::{ContextStore, MergeReport};
