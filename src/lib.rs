//! Memory Context Agent - on-screen text memory for people who lose track.
//!
//! This library watches the screen, reads the text on it, and periodically
//! asks a language model what the user is doing and which details (codes,
//! contacts, amounts) they may need to recover later.
//!
//! # Privacy
//!
//! - **Memory only**: Screen images and recognized text live in bounded
//!   in-memory buffers and are never written to disk
//! - **Minimal egress**: Only deduplicated recent text (at most a few
//!   thousand characters) is sent to the configured analysis provider
//! - **Transparency**: Every capture, extraction and analysis is counted and
//!   auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Memory Context Agent                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐       │
//! │  │ FrameSource │──▶│  Extraction  │──▶│ ContextAggregator│       │
//! │  │ (3 FPS)     │   │ (every 3rd,  │   │ (every 10s, LLM) │       │
//! │  └─────────────┘   │  ≥1s apart)  │   └──────────────────┘       │
//! │         │          └──────────────┘            │                 │
//! │         ▼                 │                    ▼                 │
//! │  ┌─────────────┐          ▼            ┌──────────────────┐       │
//! │  │Frame buffer │   ┌──────────────┐    │   ContextStore   │──▶ UI │
//! │  └─────────────┘   │ Text history │    └──────────────────┘       │
//! │                    └──────────────┘                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use memory_context_agent::{
//!     capture::CommandSource, extraction::TesseractRecognizer, transparency, Config, Pipeline,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let source = Arc::new(CommandSource::from_argv(&config.capture.command)?);
//! let recognizer = Arc::new(TesseractRecognizer::new(&config.extraction.language));
//!
//! // No analyzer: capture and OCR only
//! let mut pipeline = Pipeline::new(
//!     &config,
//!     source,
//!     recognizer,
//!     None,
//!     transparency::create_shared_log(),
//! )?;
//! pipeline.start();
//! println!("{:?}", pipeline.snapshot());
//! pipeline.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod capture;
pub mod config;
pub mod context;
pub mod core;
pub mod extraction;
pub mod pipeline;
pub mod session;
pub mod transparency;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use analysis::{AnalysisError, AnalysisProvider, Analyzer, ProviderKind};
pub use capture::{CaptureError, FrameSource, ScreenSource};
pub use config::{Config, ConfigError};
pub use context::{ContextAggregator, ContextStore, CycleOutcome};
pub use core::{ContextState, FrameRecord, KeyEvent, KeyEventKind, TextRecord, TimeWindowBuffer};
pub use extraction::{ExtractionOutcome, TextExtractionStage, TextRecognizer};
pub use pipeline::{Pipeline, RunStats};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║          MEMORY CONTEXT AGENT - PRIVACY DECLARATION              ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent reads your screen to help you remember what you      ║
║  were doing.                                                     ║
║                                                                  ║
║  ✓ WHAT WE PROCESS:                                              ║
║    • Screenshots, downscaled and held in memory (~60 seconds)    ║
║    • Text recognized on screen, held in memory (last 200 reads)  ║
║    • A short summary: current activity, application, and key     ║
║      details such as codes, emails and phone numbers             ║
║                                                                  ║
║  ✗ WHAT WE NEVER DO:                                             ║
║    • Write screenshots or raw screen text to disk                ║
║    • Send images anywhere                                        ║
║    • Send more than the last ~30 seconds of deduplicated text    ║
║      (max 4000 characters) per analysis                          ║
║                                                                  ║
║  Recognized text IS sent to the analysis provider you configure  ║
║  (Gemini, Groq or OpenAI). The session summary is saved locally  ║
║  when the agent stops.                                           ║
║                                                                  ║
║  You can view processing statistics anytime with:                ║
║    memory-context status                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("PRIVACY"));
        assert!(PRIVACY_DECLARATION.contains("NEVER DO"));
        assert!(PRIVACY_DECLARATION.contains("analysis provider"));
    }
}
