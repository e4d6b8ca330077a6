//! Client for the upstream application platform that owns tracks, routines
//! and feedback. Records come back as loose JSON objects; the sync layer
//! validates them.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PlatformConfig;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform request timed out")]
    Timeout,
    #[error("platform connection error: {0}")]
    Connection(String),
    #[error("platform rate limited after retry")]
    RateLimited,
    #[error("platform HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("platform returned unexpected payload: {0}")]
    InvalidResponse(String),
}

/// Entity collections exposed by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum Entity {
    Track,
    Routine,
    TrackFeedback,
}

/// Body for a new feedback record.
#[derive(Debug, Clone, Serialize)]
pub struct NewFeedback<'a> {
    pub track_title: &'a str,
    pub track_artist: &'a str,
    pub spotify_id: Option<&'a str>,
    pub rating: &'a str,
    pub context: &'a str,
}

#[derive(Debug, Clone)]
pub struct PlatformClient {
    client: Client,
    api_url: String,
    app_id: String,
    api_key: String,
}

fn transport_error(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout
    } else {
        PlatformError::Connection(e.to_string())
    }
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn entity_url(&self, entity: Entity) -> String {
        format!("{}/apps/{}/entities/{}", self.api_url, self.app_id, entity)
    }

    /// Fetch every record of one entity. Retries once after a 429.
    pub async fn fetch(&self, entity: Entity) -> Result<Vec<Value>, PlatformError> {
        let url = self.entity_url(entity);
        let mut retried = false;
        loop {
            let response = self
                .client
                .get(&url)
                .header("api_key", &self.api_key)
                .timeout(FETCH_TIMEOUT)
                .send()
                .await
                .map_err(transport_error)?;

            match next_step(response.status(), retried) {
                FetchStep::GiveUp => return Err(PlatformError::RateLimited),
                FetchStep::Retry => {
                    warn!(%entity, "Platform rate limited, retrying in {:?}", RATE_LIMIT_BACKOFF);
                    tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                    retried = true;
                    continue;
                }
                FetchStep::Read => {}
            }
            let body = check_status(response).await?;
            let records = parse_records(&body)?;
            debug!(%entity, count = records.len(), "Fetched platform records");
            return Ok(records);
        }
    }

    pub async fn push_feedback(&self, feedback: &NewFeedback<'_>) -> Result<(), PlatformError> {
        let response = self
            .client
            .post(self.entity_url(Entity::TrackFeedback))
            .header("api_key", &self.api_key)
            .json(feedback)
            .timeout(PUSH_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchStep {
    Read,
    Retry,
    GiveUp,
}

/// Only a 429 is retried, and only once.
fn next_step(status: StatusCode, retried: bool) -> FetchStep {
    match (status, retried) {
        (StatusCode::TOO_MANY_REQUESTS, false) => FetchStep::Retry,
        (StatusCode::TOO_MANY_REQUESTS, true) => FetchStep::GiveUp,
        _ => FetchStep::Read,
    }
}

async fn check_status(response: reqwest::Response) -> Result<String, PlatformError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(PlatformError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

/// Entity listings are a bare JSON array of objects. Non-object items are
/// kept so that the sync layer can count and skip them.
pub fn parse_records(body: &str) -> Result<Vec<Value>, PlatformError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(PlatformError::InvalidResponse(format!(
            "expected a JSON array, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(PlatformError::InvalidResponse(e.to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PlatformClient {
        PlatformClient::new(&PlatformConfig {
            api_key: "k".into(),
            api_url: "https://example.test/api/".into(),
            app_id: "app1".into(),
        })
    }

    #[test]
    fn entity_urls() {
        let c = client();
        assert_eq!(c.entity_url(Entity::Track), "https://example.test/api/apps/app1/entities/Track");
        assert_eq!(
            c.entity_url(Entity::TrackFeedback),
            "https://example.test/api/apps/app1/entities/TrackFeedback"
        );
    }

    #[test]
    fn rate_limit_retries_once() {
        assert_eq!(next_step(StatusCode::TOO_MANY_REQUESTS, false), FetchStep::Retry);
        assert_eq!(next_step(StatusCode::TOO_MANY_REQUESTS, true), FetchStep::GiveUp);
    }

    #[test]
    fn other_statuses_are_read_as_is() {
        for status in [
            StatusCode::OK,
            StatusCode::NOT_FOUND,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert_eq!(next_step(status, false), FetchStep::Read);
            assert_eq!(next_step(status, true), FetchStep::Read);
        }
    }

    #[test]
    fn records_must_be_an_array() {
        let records = parse_records(r#"[{"id": "a"}, 3]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            parse_records(r#"{"items": []}"#),
            Err(PlatformError::InvalidResponse(msg)) if msg.contains("an object")
        ));
        assert!(parse_records("not json").is_err());
    }

    #[test]
    fn feedback_body_shape() {
        let body = serde_json::to_value(NewFeedback {
            track_title: "Levels",
            track_artist: "Avicii",
            spotify_id: None,
            rating: "up",
            context: "",
        })
        .unwrap();
        assert_eq!(body["track_title"], "Levels");
        assert!(body["spotify_id"].is_null());
        assert_eq!(body["context"], "");
    }
}
