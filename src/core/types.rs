//! Records flowing through the pipeline and the aggregated context state.

use crate::core::buffer::Timestamped;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One captured (and already downscaled) screen image.
///
/// The image is shared, so cloning a record is cheap.
#[derive(Clone)]
pub struct FrameRecord {
    /// When the frame was captured
    pub timestamp: DateTime<Utc>,
    /// The downscaled screen image
    pub image: Arc<DynamicImage>,
}

impl FrameRecord {
    pub fn new(timestamp: DateTime<Utc>, image: DynamicImage) -> Self {
        Self {
            timestamp,
            image: Arc::new(image),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

impl fmt::Debug for FrameRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("FrameRecord")
            .field("timestamp", &self.timestamp)
            .field("width", &width)
            .field("height", &height)
            .finish()
    }
}

impl Timestamped for FrameRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Text recognized on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    /// Timestamp of the frame the text came from
    pub timestamp: DateTime<Utc>,
    /// All recognized regions joined by spaces
    pub text: String,
    /// Mean region confidence in [0, 1]
    pub confidence: f64,
}

impl Timestamped for TextRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Category of a flagged piece of information.
///
/// The set is open: tags outside the known list are kept verbatim in
/// [`KeyEventKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeyEventKind {
    /// One-time passwords and verification codes
    Otp,
    Email,
    Phone,
    /// People or companies
    Name,
    Url,
    /// Prices and monetary amounts
    Price,
    /// Dates and times
    Date,
    /// Order and tracking numbers
    Order,
    /// Promo, reference and other codes
    Code,
    Other(String),
}

impl KeyEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            KeyEventKind::Otp => "otp",
            KeyEventKind::Email => "email",
            KeyEventKind::Phone => "phone",
            KeyEventKind::Name => "name",
            KeyEventKind::Url => "url",
            KeyEventKind::Price => "price",
            KeyEventKind::Date => "date",
            KeyEventKind::Order => "order",
            KeyEventKind::Code => "code",
            KeyEventKind::Other(tag) => tag,
        }
    }
}

impl From<String> for KeyEventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "otp" => KeyEventKind::Otp,
            "email" => KeyEventKind::Email,
            "phone" => KeyEventKind::Phone,
            "name" => KeyEventKind::Name,
            "url" => KeyEventKind::Url,
            "price" => KeyEventKind::Price,
            "date" => KeyEventKind::Date,
            "order" => KeyEventKind::Order,
            "code" => KeyEventKind::Code,
            _ => KeyEventKind::Other(tag),
        }
    }
}

impl From<&str> for KeyEventKind {
    fn from(tag: &str) -> Self {
        KeyEventKind::from(tag.to_string())
    }
}

impl From<KeyEventKind> for String {
    fn from(kind: KeyEventKind) -> Self {
        match kind {
            KeyEventKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for KeyEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flagged value the user may need to recover later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// When the analysis that produced this event completed
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: KeyEventKind,
    pub value: String,
    /// Where the value was seen (e.g. "from Gmail")
    pub context: String,
}

impl KeyEvent {
    /// Whether `other` has the same (type, value) identity.
    pub fn same_identity(&self, kind: &KeyEventKind, value: &str) -> bool {
        self.kind == *kind && self.value == value
    }
}

impl Timestamped for KeyEvent {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Activity shown before the first successful analysis.
pub const INITIAL_ACTIVITY: &str = "Starting up...";
/// Application shown before the first successful analysis.
pub const INITIAL_APPLICATION: &str = "Unknown";

/// Aggregated view of what the user is doing, read by presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextState {
    pub activity: String,
    pub application: String,
    /// Oldest first
    pub key_events: Vec<KeyEvent>,
    /// Completion time of the last successful analysis cycle
    pub last_analysis: Option<DateTime<Utc>>,
}

impl Default for ContextState {
    fn default() -> Self {
        Self {
            activity: INITIAL_ACTIVITY.to_string(),
            application: INITIAL_APPLICATION.to_string(),
            key_events: Vec::new(),
            last_analysis: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_event_kind_tags() {
        assert_eq!(KeyEventKind::from("otp"), KeyEventKind::Otp);
        assert_eq!(KeyEventKind::from("order"), KeyEventKind::Order);
        assert_eq!(
            KeyEventKind::from("tracking"),
            KeyEventKind::Other("tracking".to_string())
        );
        assert_eq!(String::from(KeyEventKind::Price), "price");
        assert_eq!(KeyEventKind::Other("iban".into()).to_string(), "iban");
    }

    #[test]
    fn test_key_event_serializes_type_field() {
        let event = KeyEvent {
            timestamp: Utc::now(),
            kind: KeyEventKind::Email,
            value: "person@example.com".to_string(),
            context: "sender".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "email");

        let back: KeyEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_default_context_state() {
        let state = ContextState::default();
        assert_eq!(state.activity, "Starting up...");
        assert_eq!(state.application, "Unknown");
        assert!(state.key_events.is_empty());
        assert!(state.last_analysis.is_none());
    }

    #[test]
    fn test_frame_record_debug_omits_pixels() {
        let frame = FrameRecord::new(Utc::now(), DynamicImage::new_rgb8(4, 3));
        let debug = format!("{frame:?}");
        assert!(debug.contains("width: 4"));
        assert!(debug.contains("height: 3"));
        assert_eq!(frame.dimensions(), (4, 3));
    }
}
