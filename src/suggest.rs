use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RecommendationFailure, SyncError, SyncResult};

/// Default generative-language host.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Default model name.
pub const DEFAULT_MODEL: &str = "gemini-pro";

const PROMPT_PREFIX: &str = "Suggest tasks related to: ";

pub const EMPTY_QUERY_NOTICE: &str = "Please enter a query for AI recommendations.";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

// Response fields are all required: a missing level is a malformed response,
// not an empty result.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct SuggestionClient {
    http: reqwest::Client,
    pub endpoint: String,
    pub model: String,
    api_key: Option<String>,
}

impl SuggestionClient {
    /// `timeout` bounds each whole request; a stalled endpoint fails as a
    /// transport error instead of leaving the caller waiting.
    pub fn new(endpoint: String, model: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build AI HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            model,
            api_key: None,
        })
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Ask the model for task ideas related to `query`.
    ///
    /// Each text part of the first candidate is one suggestion, returned
    /// verbatim. Blank queries are rejected before any request is made.
    pub async fn recommend(&self, query: &str) -> SyncResult<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SyncError::Validation(EMPTY_QUERY_NOTICE.to_string()));
        }
        let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(RecommendationFailure::Transport("AI API key not configured".to_string()).into());
        };

        let prompt = build_prompt(query);
        let body = GenerateRequest {
            contents: [RequestContent { parts: [RequestPart { text: &prompt }] }],
        };
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        debug!(url = %endpoint, model = %self.model, "requesting AI suggestions");
        let mut url = reqwest::Url::parse(&endpoint)
            .map_err(|e| fail(RecommendationFailure::Transport(format!("invalid AI endpoint: {e}"))))?;
        url.query_pairs_mut().append_pair("key", key);

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| fail(RecommendationFailure::Transport(e.to_string())))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| fail(RecommendationFailure::Transport(e.to_string())))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(fail(RecommendationFailure::RateLimited));
        }
        if !status.is_success() {
            // Prefer the API's own message when it sent one
            let body = serde_json::from_str::<ApiErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(fail(RecommendationFailure::Status { status: status.as_u16(), body }));
        }

        parse_suggestions(&text).map_err(fail)
    }
}

fn fail(failure: RecommendationFailure) -> SyncError {
    warn!(error = %failure, "AI recommendations failed");
    SyncError::Recommendation(failure)
}

pub fn build_prompt(query: &str) -> String {
    format!("{PROMPT_PREFIX}{query}")
}

/// Extract `candidates[0].content.parts[].text`. Any other shape is an error.
fn parse_suggestions(body: &str) -> Result<Vec<String>, RecommendationFailure> {
    let resp: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| RecommendationFailure::Malformed(e.to_string()))?;
    let first = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| RecommendationFailure::Malformed("no candidates".to_string()))?;
    Ok(first.content.parts.into_iter().map(|p| p.text).collect())
}
