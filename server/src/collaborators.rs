//! External collaborators: code validation and the end-of-game log sink
//!
//! Both are called from spawned tasks, never from the coordinator loop, so a
//! slow endpoint only delays the session that asked.

use crate::config::ServerConfig;
use crate::journal::JournalEntry;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::ValidationOutcome;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered with status {0}")]
    Status(u16),
}

#[async_trait]
pub trait CodeValidator: Send + Sync {
    /// Checks an external code once. Transport problems are reported as
    /// `ValidationFailed`, never as an error.
    async fn validate(&self, code: &str) -> ValidationOutcome;
}

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn publish(&self, session: &str, entries: &[JournalEntry]) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Serialize)]
struct ValidationRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    status: ValidationOutcome,
}

#[derive(Debug, Serialize)]
struct JournalUpload<'a> {
    session: &'a str,
    events: &'a [JournalEntry],
}

/// Posts `{"code": ...}` and expects `{"status": "valid" | "invalid-code" | ...}`.
#[derive(Clone)]
pub struct HttpCodeValidator {
    client: Client,
    url: String,
}

impl HttpCodeValidator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    async fn request(&self, code: &str) -> Result<ValidationOutcome, CollaboratorError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&ValidationRequest { code })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Status(response.status().as_u16()));
        }
        let body: ValidationResponse = response.json().await?;
        Ok(body.status)
    }
}

#[async_trait]
impl CodeValidator for HttpCodeValidator {
    async fn validate(&self, code: &str) -> ValidationOutcome {
        match self.request(code).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Code validation failed: {}", e);
                ValidationOutcome::ValidationFailed
            }
        }
    }
}

/// Used when no validation endpoint is configured.
pub struct AcceptAllValidator;

#[async_trait]
impl CodeValidator for AcceptAllValidator {
    async fn validate(&self, code: &str) -> ValidationOutcome {
        warn!("No validation endpoint configured, accepting code {}", code);
        ValidationOutcome::Valid
    }
}

#[derive(Clone)]
pub struct HttpLogSink {
    client: Client,
    url: String,
}

impl HttpLogSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl LogSink for HttpLogSink {
    async fn publish(&self, session: &str, entries: &[JournalEntry]) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&JournalUpload {
                session,
                events: entries,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

pub struct NoopLogSink;

#[async_trait]
impl LogSink for NoopLogSink {
    async fn publish(&self, session: &str, entries: &[JournalEntry]) -> Result<(), CollaboratorError> {
        debug!("Session {}: discarding journal of {} events", session, entries.len());
        Ok(())
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub validator: Arc<dyn CodeValidator>,
    pub log_sink: Arc<dyn LogSink>,
}

impl Collaborators {
    pub fn from_config(config: &ServerConfig) -> Self {
        let validator: Arc<dyn CodeValidator> = match &config.validation_url {
            Some(url) => Arc::new(HttpCodeValidator::new(url.clone())),
            None => Arc::new(AcceptAllValidator),
        };
        let log_sink: Arc<dyn LogSink> = match &config.log_sink_url {
            Some(url) => Arc::new(HttpLogSink::new(url.clone())),
            None => Arc::new(NoopLogSink),
        };
        Self {
            validator,
            log_sink,
        }
    }

    pub fn offline() -> Self {
        Self {
            validator: Arc::new(AcceptAllValidator),
            log_sink: Arc::new(NoopLogSink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalEvent;

    #[test]
    fn test_validation_response_parses_outcomes() {
        let body: ValidationResponse = serde_json::from_str(r#"{"status":"expired-code"}"#).unwrap();
        assert_eq!(body.status, ValidationOutcome::ExpiredCode);
        assert!(serde_json::from_str::<ValidationResponse>(r#"{"status":"maybe"}"#).is_err());
    }

    #[test]
    fn test_upload_shape() {
        let entries = vec![JournalEntry {
            at: 1,
            event: JournalEvent::SessionReset { keep_teams: false },
        }];
        let json = serde_json::to_value(JournalUpload {
            session: "ABCDEF",
            events: &entries,
        })
        .unwrap();
        assert_eq!(json["session"], "ABCDEF");
        assert_eq!(json["events"][0]["event"], "session-reset");
    }

    #[tokio::test]
    async fn test_offline_collaborators() {
        let collaborators = Collaborators::offline();
        assert_eq!(
            collaborators.validator.validate("X").await,
            ValidationOutcome::Valid
        );
        assert!(collaborators.log_sink.publish("S", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_validator_fails_softly() {
        let validator = HttpCodeValidator::new("http://127.0.0.1:9/validate");
        assert_eq!(
            validator.validate("X").await,
            ValidationOutcome::ValidationFailed
        );
    }
}
