//! Transparency module for the memory context agent.
//!
//! Tracks how much the agent has captured, recognized and analyzed so the
//! user can audit it at any time.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
