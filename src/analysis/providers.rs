//! Language model backends.
//!
//! Each supported service is one variant of [`AnalysisProvider`]. The backend
//! is chosen once, at construction, by walking an explicit preference order
//! and taking the first provider with usable credentials.

use super::{AnalysisError, Analyzer, SYSTEM_PROMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Prefix of the sample keys shipped in example env files.
const PLACEHOLDER_PREFIX: &str = "your-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Gemini,
        ProviderKind::Groq,
        ProviderKind::OpenAi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn env_var(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::OpenAi => "gpt-4.1-mini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown analysis provider `{0}` (expected gemini, groq or openai)")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "groq" => Ok(ProviderKind::Groq),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Preferred provider first, then fallbacks, each kind at most once.
pub fn provider_order(preferred: ProviderKind, fallbacks: &[ProviderKind]) -> Vec<ProviderKind> {
    let mut order = vec![preferred];
    for kind in fallbacks {
        if !order.contains(kind) {
            order.push(*kind);
        }
    }
    order
}

/// API keys, passed explicitly to [`select_provider`].
#[derive(Clone, Default)]
pub struct Credentials {
    gemini: Option<String>,
    groq: Option<String>,
    openai: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini", &self.gemini.is_some())
            .field("groq", &self.groq.is_some())
            .field("openai", &self.openai.is_some())
            .finish()
    }
}

impl Credentials {
    /// Read each provider's key from its environment variable.
    pub fn from_env() -> Self {
        ProviderKind::ALL
            .iter()
            .fold(Self::default(), |creds, kind| match std::env::var(kind.env_var()) {
                Ok(key) => creds.with(*kind, key),
                Err(_) => creds,
            })
    }

    /// Set a key. Blank and placeholder keys are ignored.
    pub fn with(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        let key = key.into().trim().to_string();
        if key.is_empty() || key.starts_with(PLACEHOLDER_PREFIX) {
            return self;
        }
        match kind {
            ProviderKind::Gemini => self.gemini = Some(key),
            ProviderKind::Groq => self.groq = Some(key),
            ProviderKind::OpenAi => self.openai = Some(key),
        }
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Gemini => self.gemini.as_deref(),
            ProviderKind::Groq => self.groq.as_deref(),
            ProviderKind::OpenAi => self.openai.as_deref(),
        }
    }

    pub fn available(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }
}

/// Request parameters shared by all providers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Model override for the preferred provider; others use their default
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.3,
            max_tokens: 500,
            request_timeout: Duration::from_secs(30),
        }
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, AnalysisError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AnalysisError::Transport(format!("failed to create HTTP client: {e}")))
}

/// Send a JSON request and decode the JSON reply, mapping every failure to
/// a transport error.
async fn post_json<B, R>(
    request: reqwest::RequestBuilder,
    body: &B,
    service: &str,
) -> Result<R, AnalysisError>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| AnalysisError::Transport(format!("request to {service} failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(AnalysisError::Transport(format!(
            "{service} API error ({status}): {text}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AnalysisError::Transport(format!("unreadable {service} response: {e}")))
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    system_instruction: GeminiContent<'a>,
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiReplyContent>,
}

#[derive(Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Deserialize)]
struct GeminiReplyPart {
    #[serde(default)]
    text: String,
}

impl GeminiResponse {
    fn into_text(self) -> Result<String, AnalysisError> {
        let content = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or_else(|| AnalysisError::Transport("Gemini returned no candidates".to_string()))?;

        Ok(content.parts.into_iter().map(|p| p.text).collect())
    }
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        settings: &ProviderSettings,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            client: http_client(settings.request_timeout)?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, AnalysisError> {
        let body = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: SYSTEM_PROMPT,
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = self.client.post(&url).header("x-goog-api-key", &self.api_key);
        let response: GeminiResponse = post_json(request, &body, "Gemini").await?;
        response.into_text()
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions (OpenAI, Groq)
// ---------------------------------------------------------------------------

/// Client for the OpenAI chat completions API, also spoken by Groq.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    service: &'static str,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self, service: &str) -> Result<String, AnalysisError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AnalysisError::Transport(format!("{service} returned no choices")))
    }
}

impl ChatCompletionsClient {
    pub fn groq(
        api_key: impl Into<String>,
        model: impl Into<String>,
        settings: &ProviderSettings,
    ) -> Result<Self, AnalysisError> {
        Self::new("Groq", GROQ_BASE_URL, api_key, model, settings)
    }

    pub fn openai(
        api_key: impl Into<String>,
        model: impl Into<String>,
        settings: &ProviderSettings,
    ) -> Result<Self, AnalysisError> {
        Self::new("OpenAI", OPENAI_BASE_URL, api_key, model, settings)
    }

    fn new(
        service: &'static str,
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        settings: &ProviderSettings,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            client: http_client(settings.request_timeout)?,
            service,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.to_string(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, AnalysisError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let request = self.client.post(&url).bearer_auth(&self.api_key);
        let response: ChatResponse = post_json(request, &body, self.service).await?;
        response.into_text(self.service)
    }
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// The language model backend in use.
pub enum AnalysisProvider {
    Gemini(GeminiClient),
    Groq(ChatCompletionsClient),
    OpenAi(ChatCompletionsClient),
}

impl AnalysisProvider {
    pub fn build(
        kind: ProviderKind,
        api_key: &str,
        model: &str,
        settings: &ProviderSettings,
    ) -> Result<Self, AnalysisError> {
        Ok(match kind {
            ProviderKind::Gemini => Self::Gemini(GeminiClient::new(api_key, model, settings)?),
            ProviderKind::Groq => {
                Self::Groq(ChatCompletionsClient::groq(api_key, model, settings)?)
            }
            ProviderKind::OpenAi => {
                Self::OpenAi(ChatCompletionsClient::openai(api_key, model, settings)?)
            }
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Gemini(_) => ProviderKind::Gemini,
            Self::Groq(_) => ProviderKind::Groq,
            Self::OpenAi(_) => ProviderKind::OpenAi,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Gemini(client) => client.model(),
            Self::Groq(client) | Self::OpenAi(client) => client.model(),
        }
    }
}

impl fmt::Debug for AnalysisProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisProvider")
            .field("kind", &self.kind())
            .field("model", &self.model())
            .finish()
    }
}

#[async_trait]
impl Analyzer for AnalysisProvider {
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    async fn analyze(&self, prompt: &str) -> Result<String, AnalysisError> {
        match self {
            Self::Gemini(client) => client.generate(prompt).await,
            Self::Groq(client) | Self::OpenAi(client) => client.generate(prompt).await,
        }
    }
}

/// No provider in the preference order could be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUnavailable {
    /// Every provider tried, with the reason it was passed over
    pub attempts: Vec<(ProviderKind, String)>,
}

impl fmt::Display for ProviderUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return f.write_str("no analysis provider configured");
        }
        f.write_str("no analysis provider available (")?;
        for (i, (kind, reason)) in self.attempts.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{kind}: {reason}")?;
        }
        f.write_str(")")
    }
}

impl std::error::Error for ProviderUnavailable {}

/// Build the first provider in `order` that has credentials.
///
/// `settings.model` applies only to the first entry of `order`, since a
/// model name is meaningless to a different service.
pub fn select_provider(
    order: &[ProviderKind],
    credentials: &Credentials,
    settings: &ProviderSettings,
) -> Result<AnalysisProvider, ProviderUnavailable> {
    let mut attempts = Vec::new();

    for (position, kind) in order.iter().enumerate() {
        let Some(api_key) = credentials.get(*kind) else {
            debug!(provider = %kind, "no API key, trying next provider");
            attempts.push((*kind, format!("{} not set", kind.env_var())));
            continue;
        };

        let model = match (&settings.model, position) {
            (Some(model), 0) => model.as_str(),
            _ => kind.default_model(),
        };

        match AnalysisProvider::build(*kind, api_key, model, settings) {
            Ok(provider) => {
                info!(provider = %kind, model, "analysis provider selected");
                return Ok(provider);
            }
            Err(e) => attempts.push((*kind, e.to_string())),
        }
    }

    Err(ProviderUnavailable { attempts })
}
