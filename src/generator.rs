//! Candidate generation behind a trait seam.
//!
//! The playlist pipeline only needs "give me up to N track stubs for this
//! context". The production implementation asks an OpenAI-compatible chat
//! completions endpoint; tests plug in fixed lists.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GeneratorConfig;
use crate::types::{FeedbackSignals, TrackStub};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("candidate generator is not configured")]
    NotConfigured,
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A catalog track already placed in the playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorTrack {
    pub title: String,
    pub artist: String,
    pub bpm: Option<f64>,
    pub track_type: Option<String>,
    pub phase: String,
}

/// Everything a generator may use to pick candidates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateContext {
    pub duration_minutes: u32,
    pub difficulty: Option<String>,
    pub theme: Option<String>,
    pub vibe: Option<String>,
    pub audience: Option<String>,
    pub intensity_arc: Vec<String>,
    pub preferred_genres: Vec<String>,
    pub preferred_artists: Vec<String>,
    pub excluded_genres: Vec<String>,
    pub excluded_songs_or_artists: Vec<String>,
    pub needed_count: usize,
    pub existing_tracks: Vec<AnchorTrack>,
    pub feedback_signals: FeedbackSignals,
}

#[async_trait]
pub trait CandidateGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, context: &CandidateContext) -> Result<Vec<TrackStub>, GeneratorError>;
}

/// What happened to the generator call, reported alongside playlists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorStatus {
    Ok,
    Skipped,
    Failed(String),
}

impl fmt::Display for GeneratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Call the generator with a hard deadline. Never fails: any error degrades
/// to an empty candidate list and a status describing why.
pub async fn gather_candidates(
    generator: &dyn CandidateGenerator,
    context: &CandidateContext,
    deadline: Duration,
) -> (Vec<TrackStub>, GeneratorStatus) {
    if context.needed_count == 0 {
        debug!(generator = generator.name(), "No gap to fill, skipping generator");
        return (Vec::new(), GeneratorStatus::Skipped);
    }

    match tokio::time::timeout(deadline, generator.generate(context)).await {
        Ok(Ok(stubs)) => {
            debug!(
                generator = generator.name(),
                candidates = stubs.len(),
                needed = context.needed_count,
                "Generator returned candidates"
            );
            (stubs, GeneratorStatus::Ok)
        }
        Ok(Err(GeneratorError::NotConfigured)) => (Vec::new(), GeneratorStatus::Skipped),
        Ok(Err(e)) => {
            warn!(generator = generator.name(), error = %e, "Generator failed, continuing with catalog tracks only");
            (Vec::new(), GeneratorStatus::Failed(e.to_string()))
        }
        Err(_) => {
            warn!(generator = generator.name(), ?deadline, "Generator timed out, continuing with catalog tracks only");
            (Vec::new(), GeneratorStatus::Failed(GeneratorError::Timeout.to_string()))
        }
    }
}

/// Generator used when no API key is configured.
pub struct DisabledGenerator;

#[async_trait]
impl CandidateGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _context: &CandidateContext) -> Result<Vec<TrackStub>, GeneratorError> {
        Err(GeneratorError::NotConfigured)
    }
}

const SYSTEM_PROMPT: &str = "You program music for indoor cycling classes. \
Treat existing tracks as anchors and suggest only the missing tracks. \
Never suggest disliked tracks or artists. Return valid JSON only.";

/// OpenAI-compatible chat completions client.
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout,
        }
    }
}

/// The configured generator, or [`DisabledGenerator`] without an API key.
pub fn from_config(config: &GeneratorConfig) -> Box<dyn CandidateGenerator> {
    match &config.api_key {
        Some(key) => Box::new(OpenAiGenerator::new(
            config.base_url.trim_end_matches('/'),
            config.model.clone(),
            key.clone(),
            config.timeout,
        )),
        None => Box::new(DisabledGenerator),
    }
}

#[async_trait]
impl CandidateGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, context: &CandidateContext) -> Result<Vec<TrackStub>, GeneratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let user_payload = serde_json::json!({
            "request": context,
            "required_output_format": {
                "tracks": [{
                    "title": "string",
                    "artist": "string",
                    "estimated_bpm": 120,
                    "focus_area": "warmup|build|climb|sprint|recovery|cooldown",
                    "notes": "string"
                }]
            }
        });
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.3,
            response_format: ResponseFormat { kind: "json_object" },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_payload.to_string(),
                },
            ],
        };

        debug!(model = %self.model, needed = context.needed_count, "Requesting candidate tracks");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout
                } else {
                    GeneratorError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GeneratorError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            GeneratorError::InvalidResponse(format!("failed to parse chat response: {e}"))
        })?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GeneratorError::InvalidResponse("no message content".to_string()))?;

        parse_candidates(&content)
    }
}

/// Accepts either a bare JSON array or an object with a `tracks` array.
/// Items without a title or artist are dropped; a missing focus area is a build.
pub fn parse_candidates(content: &str) -> Result<Vec<TrackStub>, GeneratorError> {
    let parsed: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| GeneratorError::InvalidResponse(format!("content is not JSON: {e}")))?;

    let items = match parsed {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("tracks") {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let text = |item: &serde_json::Value, key: &str| -> String {
        match item.get(key) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };

    Ok(items
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| {
            let title = text(item, "title");
            let artist = text(item, "artist");
            if title.is_empty() || artist.is_empty() {
                return None;
            }
            let focus_area = text(item, "focus_area").to_lowercase();
            Some(TrackStub {
                title,
                artist,
                estimated_bpm: item.get("estimated_bpm").and_then(serde_json::Value::as_f64),
                focus_area: if focus_area.is_empty() {
                    "build".to_string()
                } else {
                    focus_area
                },
                notes: text(item, "notes"),
            })
        })
        .collect())
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Returns a fixed list and remembers the contexts it was asked with.
    pub struct FixedGenerator {
        pub stubs: Vec<TrackStub>,
        pub seen: Mutex<Vec<CandidateContext>>,
    }

    impl FixedGenerator {
        pub fn new(stubs: Vec<TrackStub>) -> Self {
            Self {
                stubs,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CandidateGenerator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, context: &CandidateContext) -> Result<Vec<TrackStub>, GeneratorError> {
            self.seen.lock().unwrap().push(context.clone());
            Ok(self.stubs.clone())
        }
    }

    pub struct FailingGenerator;

    #[async_trait]
    impl CandidateGenerator for FailingGenerator {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _context: &CandidateContext) -> Result<Vec<TrackStub>, GeneratorError> {
            Err(GeneratorError::Api {
                status: 401,
                message: "bad key".to_string(),
            })
        }
    }

    pub struct SlowGenerator;

    #[async_trait]
    impl CandidateGenerator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _context: &CandidateContext) -> Result<Vec<TrackStub>, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    pub fn stub(title: &str, artist: &str, focus_area: &str) -> TrackStub {
        TrackStub {
            title: title.to_string(),
            artist: artist.to_string(),
            estimated_bpm: Some(120.0),
            focus_area: focus_area.to_string(),
            notes: String::new(),
        }
    }
}
