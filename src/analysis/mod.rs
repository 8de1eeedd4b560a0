//! Structured analysis of recent screen text by a language model.
//!
//! This module owns everything on our side of the wire: the fixed-schema
//! prompt, input truncation, and turning the model's reply into an
//! [`AnalysisResult`]. Transport lives in [`providers`].

pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use providers::{
    provider_order, select_provider, AnalysisProvider, ChatCompletionsClient, Credentials,
    GeminiClient, ProviderKind, ProviderSettings, ProviderUnavailable, UnknownProvider,
};

/// System instruction sent with every request by providers that support one.
pub const SYSTEM_PROMPT: &str = "You help people who lose track of what they were doing \
reconstruct their recent screen activity. Answer concisely and accurately, and reply with \
valid JSON only.";

/// Appended to analysis input that had to be cut.
pub const TRUNCATION_MARKER: &str = "...";

/// Capability that turns a prompt into the model's raw text reply.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn analyze(&self, prompt: &str) -> Result<String, AnalysisError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// The request did not produce a reply (network, HTTP status, empty body).
    #[error("analysis transport error: {0}")]
    Transport(String),

    /// The reply was not the required JSON shape.
    #[error("analysis response could not be parsed: {0}")]
    Parse(String),
}

/// One flagged value reported by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(default)]
    pub context: String,
}

/// The reply schema requested by [`build_prompt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub activity: String,
    pub application: String,
    #[serde(default)]
    pub key_info: Vec<KeyInfo>,
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}{}", &text[..end], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// The analysis request for `screen_text`, which should already be truncated.
pub fn build_prompt(screen_text: &str) -> String {
    format!(
        r#"The text below was read from a person's screen over the last few seconds.
Work out three things:

1. activity: what the person is doing right now, in a few words
   (for example "replying to an email" or "reviewing a pull request").
2. application: the application or website in use
   (for example "Gmail" or "Firefox - GitHub").
3. key_info: details they may need to recall later. Look for verification
   or one-time codes, email addresses, phone numbers, names of people or
   companies, links, prices, dates and times, and order or tracking numbers.
   Tag each item with one of: otp, email, phone, name, url, price, date,
   order, code, other.

Screen text:
---
{screen_text}
---

Reply with a single JSON object and nothing else:
{{
  "activity": "short description",
  "application": "application or site name",
  "key_info": [
    {{"type": "otp", "value": "482913", "context": "sign-in code from the bank"}},
    {{"type": "email", "value": "alex@example.com", "context": "invoice sender"}}
  ]
}}

Use an empty key_info array when nothing is worth remembering. Leave out
ordinary interface labels."#
    )
}

/// Strip a surrounding markdown code fence (with optional `json` tag).
pub fn unwrap_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let body = rest.split("```").next().unwrap_or(rest);
    body.strip_prefix("json").unwrap_or(body).trim()
}

/// Parse a model reply into the required shape.
pub fn parse_analysis(reply: &str) -> Result<AnalysisResult, AnalysisError> {
    serde_json::from_str(unwrap_code_fence(reply)).map_err(|e| AnalysisError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("exactly", 7), "exactly");
        assert_eq!(truncate_text("abcdefgh", 3), "abc...");
        // counts characters, not bytes
        assert_eq!(truncate_text("ééééé", 2), "éé...");
    }

    #[test]
    fn test_prompt_embeds_text_and_schema() {
        let prompt = build_prompt("Your code is 847291");
        assert!(prompt.contains("---\nYour code is 847291\n---"));
        assert!(prompt.contains("\"key_info\""));
        assert!(prompt.contains("\"activity\""));
    }

    #[test]
    fn test_unwrap_code_fence() {
        assert_eq!(unwrap_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(unwrap_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(unwrap_code_fence("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = r#"```json
{"activity": "banking", "application": "Bank App",
 "key_info": [{"type": "otp", "value": "999111", "context": "sms"},
              {"type": "loyalty", "value": "GOLD"}]}
```"#;
        let result = parse_analysis(reply).unwrap();
        assert_eq!(result.activity, "banking");
        assert_eq!(result.key_info.len(), 2);
        assert_eq!(result.key_info[1].kind, "loyalty");
        assert_eq!(result.key_info[1].context, "");
    }

    #[test]
    fn test_key_info_defaults_to_empty() {
        let result = parse_analysis(r#"{"activity": "idle", "application": "Finder"}"#).unwrap();
        assert!(result.key_info.is_empty());
    }

    #[test]
    fn test_wrong_shape_is_parse_error() {
        for reply in [
            "I could not tell what the user was doing.",
            r#"{"application": "Gmail", "key_info": []}"#,
            r#"{"activity": 3, "application": "Gmail"}"#,
            r#"{"activity": "x", "application": "y", "key_info": [{"type": "otp"}]}"#,
            "",
        ] {
            assert!(
                matches!(parse_analysis(reply), Err(AnalysisError::Parse(_))),
                "accepted {reply:?}"
            );
        }
    }
}
