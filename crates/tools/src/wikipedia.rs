//! Wikipedia summary tool, using the REST `page/summary` endpoint.

use async_trait::async_trait;
use jarvis_core::error::ToolError;
use jarvis_core::tool::Tool;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{http_client, required_str};

const SUMMARY_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary";
const DEFAULT_SENTENCES: usize = 2;

pub struct WikipediaTool {
    client: reqwest::Client,
    base_url: String,
}

impl WikipediaTool {
    pub fn new() -> Self {
        Self::with_base_url(SUMMARY_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "wikipedia_summary".into(),
            reason: reason.into(),
        }
    }
}

impl Default for WikipediaTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(default)]
    extract: String,
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia_summary"
    }

    fn description(&self) -> &str {
        "Fetch a brief summary of a Wikipedia article."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "The article title, e.g. 'Python (programming language)'"
                },
                "sentences": {
                    "type": "integer",
                    "description": "How many sentences to return (default 2)"
                }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let topic = required_str(&arguments, "topic")?;
        let sentences = arguments
            .get("sentences")
            .and_then(Value::as_u64)
            .map(|n| n.clamp(1, 10) as usize)
            .unwrap_or(DEFAULT_SENTENCES);

        let title = topic.replace(' ', "_");
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| self.failed(format!("bad summary endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| self.failed("bad summary endpoint"))?
            .push(&title);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.failed(format!("Wikipedia unreachable: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(self.failed(format!("No Wikipedia page found for '{topic}'.")));
        }
        if !response.status().is_success() {
            return Err(self.failed(format!("Wikipedia returned {}", response.status())));
        }
        let summary: Summary = response
            .json()
            .await
            .map_err(|e| self.failed(format!("unexpected Wikipedia response: {e}")))?;

        if summary.extract.trim().is_empty() {
            return Err(self.failed(format!("No Wikipedia page found for '{topic}'.")));
        }
        Ok(first_sentences(&summary.extract, sentences))
    }
}

/// Keep the first `n` sentences of an extract, split on ". ".
fn first_sentences(extract: &str, n: usize) -> String {
    let mut snippet = extract.split(". ").take(n).collect::<Vec<_>>().join(". ");
    if !snippet.ends_with('.') {
        snippet.push('.');
    }
    snippet
}
