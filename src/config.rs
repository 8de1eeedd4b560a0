//! Configuration for the Memory Context Agent.

use crate::analysis::{provider_order, ProviderKind, ProviderSettings};
use crate::capture::{CommandSource, FrameSettings};
use crate::context::AggregatorSettings;
use crate::extraction::ExtractionSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "memory-context-agent";

/// Highest accepted capture rate.
pub const MAX_FPS: f64 = 60.0;
/// Most frames the capture buffer may hold.
pub const MAX_FRAME_CAPACITY: usize = 10_000;

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub extraction: ExtractionConfig,
    pub analysis: AnalysisConfig,

    /// How long each stage gets to stop before it is abandoned
    #[serde(with = "duration_serde")]
    pub stop_timeout: Duration,

    /// Path for transparency stats
    pub data_path: PathBuf,

    /// Path for session exports
    pub export_path: PathBuf,

    /// Key events shown by `status` and the live view
    pub key_events_display_count: usize,

    /// Refresh period of the live view
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            capture: CaptureConfig::default(),
            extraction: ExtractionConfig::default(),
            analysis: AnalysisConfig::default(),
            stop_timeout: Duration::from_secs(2),
            export_path: data_dir.join("sessions"),
            data_path: data_dir,
            key_events_display_count: 10,
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target frames per second
    pub fps: f64,
    /// Span of frames kept in memory
    #[serde(with = "duration_serde")]
    pub buffer_duration: Duration,
    /// Longest edge of a stored frame, in pixels
    pub max_dimension: u32,
    /// Screenshot command writing one image to stdout
    pub command: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 3.0,
            buffer_duration: Duration::from_secs(60),
            max_dimension: 1920,
            command: CommandSource::default_argv(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub every_nth_frame: u64,
    #[serde(with = "duration_serde")]
    pub min_interval: Duration,
    /// Text records kept in memory
    pub text_capacity: usize,
    /// Tesseract language code
    pub language: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            every_nth_frame: 3,
            min_interval: Duration::from_secs(1),
            text_capacity: 200,
            language: "eng".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    #[serde(with = "duration_serde")]
    pub text_window: Duration,
    pub max_chars: usize,
    pub key_event_capacity: usize,
    /// Preferred provider
    pub provider: ProviderKind,
    /// Tried in order when the preferred provider has no credentials
    pub fallbacks: Vec<ProviderKind>,
    /// Model override for the preferred provider
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            text_window: Duration::from_secs(30),
            max_chars: 4000,
            key_event_capacity: 50,
            provider: ProviderKind::Gemini,
            fallbacks: vec![ProviderKind::Groq, ProviderKind::OpenAi],
            model: None,
            temperature: 0.3,
            max_tokens: 500,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Reject settings no pipeline can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(name: &str, duration: Duration) -> Result<(), ConfigError> {
            if duration.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
            Ok(())
        }
        fn nonzero(name: &str, value: usize) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
            Ok(())
        }

        let capture = &self.capture;
        if !(capture.fps > 0.0 && capture.fps <= MAX_FPS)
            || Duration::try_from_secs_f64(1.0 / capture.fps).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "capture.fps must be within (0, {MAX_FPS}], got {}",
                capture.fps
            )));
        }
        positive("capture.buffer_duration", capture.buffer_duration)?;
        if self.frame_capacity() > MAX_FRAME_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "capture buffer would hold {} frames, at most {MAX_FRAME_CAPACITY} allowed",
                self.frame_capacity()
            )));
        }
        nonzero("capture.max_dimension", capture.max_dimension as usize)?;
        if capture.command.is_empty() {
            return Err(ConfigError::Invalid("capture.command is empty".to_string()));
        }

        let extraction = &self.extraction;
        nonzero("extraction.every_nth_frame", extraction.every_nth_frame as usize)?;
        nonzero("extraction.text_capacity", extraction.text_capacity)?;

        let analysis = &self.analysis;
        positive("analysis.interval", analysis.interval)?;
        positive("analysis.text_window", analysis.text_window)?;
        positive("analysis.request_timeout", analysis.request_timeout)?;
        nonzero("analysis.max_chars", analysis.max_chars)?;
        nonzero("analysis.key_event_capacity", analysis.key_event_capacity)?;
        nonzero("analysis.max_tokens", analysis.max_tokens as usize)?;
        if !(0.0..=2.0).contains(&analysis.temperature) {
            return Err(ConfigError::Invalid(format!(
                "analysis.temperature must be within 0..=2, got {}",
                analysis.temperature
            )));
        }

        positive("stop_timeout", self.stop_timeout)?;
        positive("poll_interval", self.poll_interval)?;
        Ok(())
    }

    /// Frames held in memory: enough for `buffer_duration` at `fps`.
    pub fn frame_capacity(&self) -> usize {
        let frames = (self.capture.fps * self.capture.buffer_duration.as_secs_f64()).ceil();
        (frames as usize).max(1)
    }

    pub fn frame_settings(&self) -> FrameSettings {
        FrameSettings {
            fps: self.capture.fps,
            max_dimension: self.capture.max_dimension,
            buffer_capacity: self.frame_capacity(),
        }
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        ExtractionSettings {
            every_nth_frame: self.extraction.every_nth_frame,
            min_interval: self.extraction.min_interval,
        }
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            interval: self.analysis.interval,
            text_window: self.analysis.text_window,
            max_chars: self.analysis.max_chars,
        }
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            model: self.analysis.model.clone(),
            temperature: self.analysis.temperature,
            max_tokens: self.analysis.max_tokens,
            request_timeout: self.analysis.request_timeout,
        }
    }

    /// Providers to try, preferred first.
    pub fn provider_order(&self) -> Vec<ProviderKind> {
        provider_order(self.analysis.provider, &self.analysis.fallbacks)
    }

    /// Where transparency stats are persisted.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("transparency_stats.json")
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
