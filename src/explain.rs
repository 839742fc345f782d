//! Disease explanations from a generative-text service.
//!
//! The service is optional. Callers that only want text for display use
//! `explain_or_message`, which folds "not configured" and request failures into
//! a plain-text message instead of an error.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const NOT_CONFIGURED_MESSAGE: &str =
    "The explanation service is not configured. Set an API key to enable disease explanations.";

pub trait ExplanationClient: Send + Sync {
    fn explain(&self, disease_label: &str) -> Result<String>;
}

/// Prompt asking for the three report sections.
pub fn build_prompt(disease_label: &str) -> String {
    format!(
        "Give a detailed explanation of the rice leaf disease \"{label}\" using this format:\n\
         \n\
         EXPLANATION:\n\
         [Describe the symptoms and causes of the disease on rice leaves in detail]\n\
         \n\
         IMPACT:\n\
         [Describe the impact of this disease on the rice plant]\n\
         \n\
         TREATMENT RECOMMENDATIONS:\n\
         [Give 2-4 treatment recommendations farmers can apply]\n",
        label = disease_label
    )
}

/// Explanation text, or a message saying why there is none.
pub fn explain_or_message(client: Option<&dyn ExplanationClient>, disease_label: &str) -> String {
    let Some(client) = client else {
        return NOT_CONFIGURED_MESSAGE.to_string();
    };
    match client.explain(disease_label) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("explanation request for '{}' failed: {:#}", disease_label, err);
            format!(
                "An error occurred while fetching the explanation: {:#}",
                err
            )
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

/// Client for the `generateContent` REST endpoint.
pub struct GeminiClient {
    settings: GeminiSettings,
    agent: ureq::Agent,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(anyhow!("explanation api key is empty"));
        }
        url::Url::parse(&settings.endpoint)
            .with_context(|| format!("invalid explanation endpoint {}", settings.endpoint))?;
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Ok(Self { settings, agent })
    }

    /// The key travels in a header so it never shows up in logged URLs.
    fn request_url(&self) -> Result<url::Url> {
        let base = self.settings.endpoint.trim_end_matches('/');
        url::Url::parse(&format!(
            "{}/models/{}:generateContent",
            base, self.settings.model
        ))
        .context("build explanation request url")
    }
}

impl ExplanationClient for GeminiClient {
    fn explain(&self, disease_label: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(disease_label) }] }]
        });
        let url = self.request_url()?;
        let response = match self
            .agent
            .post(url.as_str())
            .set("Content-Type", "application/json")
            .set("x-goog-api-key", &self.settings.api_key)
            .send_string(&body.to_string())
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(anyhow!(
                    "explanation service returned HTTP {}: {}",
                    code,
                    error_message(&detail)
                ));
            }
            Err(err) => return Err(anyhow!("explanation service unreachable: {}", err)),
        };
        let text = response
            .into_string()
            .context("read explanation response")?;
        let value: Value =
            serde_json::from_str(&text).context("parse explanation response json")?;
        extract_text(&value)
    }
}

/// First candidate's text parts, concatenated.
pub(crate) fn extract_text(response: &Value) -> Result<String> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("explanation response has no candidates"))?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err(anyhow!("explanation response is empty"));
    }
    Ok(text)
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClient(Result<String, String>);

    impl ExplanationClient for FakeClient {
        fn explain(&self, _disease_label: &str) -> Result<String> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    #[test]
    fn prompt_names_disease_and_sections() {
        let prompt = build_prompt("Brown Spot");
        assert!(prompt.contains("\"Brown Spot\""));
        for section in ["EXPLANATION:", "IMPACT:", "TREATMENT RECOMMENDATIONS:"] {
            assert!(prompt.contains(section));
        }
    }

    #[test]
    fn missing_client_yields_message() {
        assert_eq!(explain_or_message(None, "Tungro"), NOT_CONFIGURED_MESSAGE);
    }

    #[test]
    fn failures_become_plain_text() {
        let client = FakeClient(Err("connection refused".to_string()));
        let text = explain_or_message(Some(&client), "Tungro");
        assert!(text.contains("connection refused"));

        let client = FakeClient(Ok("EXPLANATION: ...".to_string()));
        assert_eq!(explain_or_message(Some(&client), "Tungro"), "EXPLANATION: ...");
    }

    #[test]
    fn extracts_first_candidate_text() {
        let value = json!({
            "candidates": [
                { "content": { "parts": [{ "text": "Part one. " }, { "text": "Part two." }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        });
        assert_eq!(extract_text(&value).unwrap(), "Part one. Part two.");
        assert!(extract_text(&json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn request_url_names_model_without_key() {
        let client = GeminiClient::new(GeminiSettings {
            api_key: "k&y".to_string(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: format!("{}/", DEFAULT_ENDPOINT),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let url = client.request_url().unwrap();
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert!(!url.as_str().contains("k&y"));
    }
}
