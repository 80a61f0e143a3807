//! External AI metadata extraction.
//!
//! Sends a bounded excerpt of the page text to the Gemini `generateContent`
//! endpoint and asks for the four rename fields as JSON. Partial answers
//! are tolerated: any field the service omits stays empty. Failed requests
//! are never retried automatically; every call is billed and the user
//! re-triggers explicitly.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AiConfig;
use crate::error::AiError;
use crate::metadata;

/// The four metadata fields as returned by the AI service. `None` means
/// the service did not answer for that field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFields {
    pub date: Option<String>,
    pub organization: Option<String>,
    pub subject: Option<String>,
    pub receiver: Option<String>,
}

impl MetadataFields {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.organization.is_none()
            && self.subject.is_none()
            && self.receiver.is_none()
    }
}

pub struct MetadataExtractor {
    http: Client,
    config: AiConfig,
}

impl MetadataExtractor {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AiError::RequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Analyze extracted text and return the four fields.
    ///
    /// The API key precondition is checked synchronously before any
    /// network activity.
    pub async fn analyze(&self, text: &str) -> Result<MetadataFields, AiError> {
        if !self.config.has_api_key() {
            return Err(AiError::PreconditionMissing);
        }

        let excerpt = excerpt(text, self.config.max_excerpt_chars);
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(excerpt),
                }],
            }],
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.endpoint, self.config.model, self.config.api_key
        );

        tracing::info!(
            "[MetadataExtractor] Requesting analysis ({} chars excerpt, model {})",
            excerpt.chars().count(),
            self.config.model
        );

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AiError::ParseFailed(format!("Invalid response body: {}", e)))?;

        let content = parsed.joined_text();
        if content.trim().is_empty() {
            return Err(AiError::ParseFailed("Empty response from service".to_string()));
        }

        parse_fields(&content)
    }
}

fn build_prompt(excerpt: &str) -> String {
    format!(
        r#"You are helping rename a scanned or digital document from its content.

Read the document text below and extract four fields. Respond with ONLY a JSON object:
{{
  "date": "the document's primary date in YYYY-MM-DD form, or null if none is present",
  "organization": "the issuing company/organization name, or null",
  "subject": "a short subject or description (a few words), or null",
  "receiver": "the person or entity the document is addressed to, or null"
}}

Leave a field null rather than guessing. Do not invent values.

Document text:
---
{}
---"#,
        excerpt
    )
}

/// Parse the model's answer into fields. Missing or null fields stay
/// `None`; only structurally unusable answers are an error.
pub(crate) fn parse_fields(content: &str) -> Result<MetadataFields, AiError> {
    let json_str = extract_json_object(content)?;

    #[derive(Deserialize)]
    struct RawFields {
        #[serde(default)]
        date: Option<String>,
        #[serde(default)]
        organization: Option<String>,
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        receiver: Option<String>,
    }

    let raw: RawFields = serde_json::from_str(&json_str)
        .map_err(|e| AiError::ParseFailed(format!("{} in: {}", e, json_str)))?;

    Ok(MetadataFields {
        date: normalize_date(raw.date),
        organization: normalize(raw.organization),
        subject: normalize(raw.subject),
        receiver: normalize(raw.receiver),
    })
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "null")
}

/// Dates get canonicalized when parseable; otherwise the service's wording
/// is kept for the user to correct.
fn normalize_date(value: Option<String>) -> Option<String> {
    let value = normalize(value)?;
    Some(
        metadata::parse_date(&value)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or(value),
    )
}

/// Extract a JSON object from a response that might wrap it in markdown
/// code fences or surrounding prose.
pub(crate) fn extract_json_object(text: &str) -> Result<String, AiError> {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Ok(text[json_start..json_start + end].trim().to_string());
        }
    }

    if let Some(start) = text.find("```") {
        let block_start = start + 3;
        let content_start = text[block_start..]
            .find('\n')
            .map(|i| block_start + i + 1)
            .unwrap_or(block_start);
        if let Some(end) = text[content_start..].find("```") {
            return Ok(text[content_start..content_start + end].trim().to_string());
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            return Ok(text[start..=end].to_string());
        }
    }

    Err(AiError::ParseFailed(
        "No JSON object found in response".to_string(),
    ))
}

/// Bound the excerpt to a number of characters.
fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

// Gemini generateContent wire types.

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    fn joined_text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}
