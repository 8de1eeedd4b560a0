//! Screen capture through an external screenshot command.
//!
//! The command must write one encoded image (PNG or JPEG) to stdout, e.g.
//! `grim -` on Wayland or `screencapture -x -t png /dev/stdout` on macOS.

use super::{CaptureError, CapturedFrame, ScreenSource};
use chrono::Utc;
use std::process::{Command, Stdio};

/// Captures the screen by running a command and decoding its stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a full argument vector (`program arg...`).
    pub fn from_argv(argv: &[String]) -> Result<Self, CaptureError> {
        let (program, args) = argv.split_first().ok_or_else(|| CaptureError::Command {
            program: String::new(),
            message: "capture command is empty".to_string(),
        })?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    /// The screenshot command used when none is configured.
    pub fn default_argv() -> Vec<String> {
        #[cfg(target_os = "macos")]
        let argv = ["screencapture", "-x", "-t", "png", "/dev/stdout"];

        #[cfg(not(target_os = "macos"))]
        let argv = ["grim", "-"];

        argv.iter().map(|s| s.to_string()).collect()
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ScreenSource for CommandSource {
    fn name(&self) -> &str {
        &self.program
    }

    fn capture_frame(&self) -> Result<CapturedFrame, CaptureError> {
        let timestamp = Utc::now();

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CaptureError::Command {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CaptureError::Command {
                program: self.program.clone(),
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        if output.stdout.is_empty() {
            return Err(CaptureError::EmptyOutput);
        }

        let image = image::load_from_memory(&output.stdout)
            .map_err(|e| CaptureError::Decode(e.to_string()))?;

        Ok(CapturedFrame { timestamp, image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_argv() {
        let argv = vec!["grim".to_string(), "-".to_string()];
        let source = CommandSource::from_argv(&argv).unwrap();
        assert_eq!(source.program(), "grim");
        assert_eq!(source.name(), "grim");

        assert!(CommandSource::from_argv(&[]).is_err());
        assert!(!CommandSource::default_argv().is_empty());
    }

    #[test]
    fn test_missing_program_is_a_capture_error() {
        let source = CommandSource::new("definitely-not-a-screenshot-tool", Vec::new());
        let err = source.capture_frame().unwrap_err();
        assert!(matches!(err, CaptureError::Command { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_image_output_fails_to_decode() {
        let source = CommandSource::new("echo", vec!["not an image".to_string()]);
        let err = source.capture_frame().unwrap_err();
        assert!(matches!(err, CaptureError::Decode(_)));
    }
}
