//! Core building blocks shared by every pipeline stage.
//!
//! This module contains:
//! - Count-bounded time-window buffers
//! - The records passed between stages and the aggregated context state
//! - Stage task handles with bounded shutdown

pub mod buffer;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use buffer::{window_cutoff, BufferStats, TimeWindowBuffer, Timestamped};
pub use task::StageHandle;
pub use types::{
    ContextState, FrameRecord, KeyEvent, KeyEventKind, TextRecord, INITIAL_ACTIVITY,
    INITIAL_APPLICATION,
};
