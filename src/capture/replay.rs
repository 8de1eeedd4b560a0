//! Replays screenshots from a directory instead of the live screen.

use super::{CaptureError, CapturedFrame, ScreenSource};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Cycles through the image files of a directory in name order.
#[derive(Debug)]
pub struct DirectorySource {
    files: Vec<PathBuf>,
    next: AtomicUsize,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self, CaptureError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();

        if files.is_empty() {
            return Err(CaptureError::NoImages(dir.to_path_buf()));
        }
        files.sort();

        Ok(Self {
            files,
            next: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl ScreenSource for DirectorySource {
    fn name(&self) -> &str {
        "replay"
    }

    fn capture_frame(&self) -> Result<CapturedFrame, CaptureError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.files.len();
        let image =
            image::open(&self.files[index]).map_err(|e| CaptureError::Decode(e.to_string()))?;

        Ok(CapturedFrame {
            timestamp: Utc::now(),
            image,
        })
    }
}
