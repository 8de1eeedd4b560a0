//! Screen capture for the memory context agent.
//!
//! The raw capture device sits behind the [`ScreenSource`] trait. The
//! [`FrameSource`] drives a source at a target rate, downscales each frame,
//! buffers it and hands it to subscribers.

pub mod command;
pub mod frame_source;
pub mod replay;
pub mod scale;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::path::PathBuf;

pub use command::CommandSource;
pub use frame_source::{ChannelSubscriber, FrameSettings, FrameSource, FrameSubscriber};
pub use replay::DirectorySource;
pub use scale::{downscale, target_size};

/// A raw frame straight from the capture device.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp: DateTime<Utc>,
    pub image: DynamicImage,
}

/// Capture device capability.
///
/// Implementations are called from a blocking worker thread, one call at a
/// time per [`FrameSource`].
pub trait ScreenSource: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    fn capture_frame(&self) -> Result<CapturedFrame, CaptureError>;
}

/// Transient capture failures; the capture loop logs them and continues.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture command `{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("capture produced no image data")]
    EmptyOutput,

    #[error("could not decode captured image: {0}")]
    Decode(String),

    #[error("no images found in {0:?}")]
    NoImages(PathBuf),

    #[error("capture worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
