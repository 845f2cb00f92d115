// SPDX-License-Identifier: MIT

//! OpenAI-compatible chat completions reasoner

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::error::Error;
use url::Url;

use super::Reasoner;
use crate::adk::error::WeftError;
use crate::weft::config::Settings;

const SYSTEM_PROMPT: &str = "You are a step in an automated workflow. \
Answer the request directly and concisely, without preamble.";

/// Reasoner backed by an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAIReasoner {
    client: Client,
    api_key: String,
    model_name: String,
    endpoint: Url,
}

impl OpenAIReasoner {
    pub fn new(api_key: String, base_url: &Url, model_name: String) -> Result<Self, WeftError> {
        // Url::join would drop the last path segment of `.../v1`
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            base_url.as_str().trim_end_matches('/')
        ))
        .map_err(|e| WeftError::config(format!("invalid OpenAI base URL: {}", e)))?;

        Ok(Self {
            client: Client::new(),
            api_key,
            model_name,
            endpoint,
        })
    }

    /// Build from settings; requires `OPENAI_API_KEY`
    pub fn from_settings(settings: &Settings) -> Result<Self, WeftError> {
        let api_key = settings
            .openai_api_key
            .clone()
            .ok_or_else(|| WeftError::config("OPENAI_API_KEY must be set"))?;
        Self::new(api_key, &settings.openai_base_url, settings.model.clone())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model_name,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ]
        })
    }

    fn parse_response(response: &Value) -> Result<String, Box<dyn Error + Send + Sync>> {
        let choice = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or("No choices in OpenAI response")?;

        choice["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| "OpenAI response has no text content".into())
    }
}

#[async_trait]
impl Reasoner for OpenAIReasoner {
    async fn evaluate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let body = self.request_body(prompt);
        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(format!("OpenAI API error: {}", text).into());
        }

        let resp_json: Value = resp.json().await?;
        log::debug!("OpenAI response: {}", resp_json);
        Self::parse_response(&resp_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasoner(base: &str) -> OpenAIReasoner {
        OpenAIReasoner::new(
            "test-key".to_string(),
            &Url::parse(base).unwrap(),
            "gpt-4o-mini".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_version_segment() {
        assert_eq!(
            reasoner("https://api.openai.com/v1").endpoint().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            reasoner("http://localhost:8080/v1/").endpoint().as_str(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body() {
        let body = reasoner("https://api.openai.com/v1").request_body("Is it cold?");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Is it cold?");
    }

    #[test]
    fn test_parse_response() {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "  Yes.\n"}}]
        });
        assert_eq!(OpenAIReasoner::parse_response(&response).unwrap(), "Yes.");

        let empty = json!({"choices": []});
        assert!(OpenAIReasoner::parse_response(&empty).is_err());
    }

    #[test]
    fn test_from_settings_requires_key() {
        let settings = Settings::from_lookup(|_: &str| None).unwrap();
        assert!(matches!(
            OpenAIReasoner::from_settings(&settings),
            Err(WeftError::Config(_))
        ));
    }
}
