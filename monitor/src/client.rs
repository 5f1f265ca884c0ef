//! HTTP client for the trace API.
//!
//! Read/write access to traces plus the discovery-specific commands the
//! store issues on behalf of the UI. All errors stay inside `ApiError`;
//! callers decide whether a failure is recoverable (polling) or must be
//! surfaced (commands).

use serde::{Deserialize, Serialize};

use shared_types::{ConversationMessage, MessageRole, Trace};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Response of the discovery start/refine endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct StartedRun {
    pub trace_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// One prior turn, as the refinement endpoint expects it.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub role: MessageRole,
    pub content: String,
}

impl From<&ConversationMessage> for ConversationTurn {
    fn from(message: &ConversationMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefinementRequest {
    pub session_id: Option<String>,
    pub source_trace_id: String,
    pub conversation: Vec<ConversationTurn>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TraceApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl TraceApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_traces(&self) -> Result<Vec<Trace>, ApiError> {
        let response = self
            .http
            .get(format!("{}/traces/", self.base_url))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn get_trace(&self, id: &str) -> Result<Trace, ApiError> {
        let response = self
            .http
            .get(format!("{}/traces/{id}", self.base_url))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn delete_trace(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(format!("{}/traces/{id}", self.base_url))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn start_discovery(&self, query: &str, locale: &str) -> Result<StartedRun, ApiError> {
        let response = self
            .http
            .post(format!("{}/discovery/start", self.base_url))
            .json(&serde_json::json!({ "query": query, "locale": locale }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn submit_refinement(
        &self,
        request: &RefinementRequest,
    ) -> Result<StartedRun, ApiError> {
        let response = self
            .http
            .post(format!("{}/discovery/refine", self.base_url))
            .json(request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status { status, body })
    }
}
