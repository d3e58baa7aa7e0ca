use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

use crate::error::{DppError, DppResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequestData {
    pub prompt_template: String,
    #[serde(default)]
    pub template_var_to_value_dict: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponseData {
    /// The prompt actually sent, after template substitution.
    pub llm_request_txt: String,
    pub llm_response_txt: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_llm_response(&self, request: LlmRequestData) -> DppResult<LlmResponseData>;
}

/// Replaces `{name}` placeholders in one pass. Unknown placeholders are left
/// as-is and substituted values are never re-scanned.
pub fn render_prompt(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub model_name: String,
    /// Environment variable holding the bearer token. `None` sends no auth.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    4
}

impl LlmProviderConfig {
    pub fn validate(&self) -> DppResult<()> {
        if self.api_url.trim().is_empty() {
            return Err(DppError::config("llm api_url must not be empty"));
        }
        if self.model_name.trim().is_empty() {
            return Err(DppError::config("llm model_name must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(DppError::config(format!(
                "llm temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(DppError::config("llm max_tokens must be greater than zero"));
        }
        Ok(())
    }
}

const PROVIDER_NAME: &str = "openai_format";

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiFormatLlmProvider {
    http: Client,
    api_key: Option<String>,
    config: LlmProviderConfig,
}

impl OpenAiFormatLlmProvider {
    pub fn new(config: LlmProviderConfig) -> DppResult<Self> {
        config.validate()?;

        let api_key = match config.api_key_env.as_deref() {
            Some(var) => Some(std::env::var(var).map_err(|_| DppError::Dependency {
                name: var.to_string(),
                detail: "environment variable for the llm api key is not set".into(),
            })?),
            None => None,
        };

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| DppError::config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            api_key,
            config,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.config.model_name,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        })
    }

    async fn post_json(&self, body: &Value) -> reqwest::Result<reqwest::Response> {
        let mut request = self.http.post(&self.config.api_url).json(body);
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        request.send().await
    }
}

#[async_trait]
impl LlmProvider for OpenAiFormatLlmProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn get_llm_response(&self, request: LlmRequestData) -> DppResult<LlmResponseData> {
        let prompt = render_prompt(&request.prompt_template, &request.template_var_to_value_dict);
        let body = self.request_body(&prompt);

        let mut delay = Duration::from_millis(300);
        for attempt in 0..=self.config.max_retries {
            let resp = self
                .post_json(&body)
                .await
                .map_err(|err| DppError::provider(PROVIDER_NAME, format!("network error | {err}")))?;

            let status = resp.status();
            if status.is_success() {
                let v: Value = resp.json().await.map_err(|err| {
                    DppError::provider(PROVIDER_NAME, format!("invalid response body: {err}"))
                })?;
                let content = extract_message_content(&v).ok_or_else(|| {
                    DppError::provider(PROVIDER_NAME, "choices[0].message.content missing")
                })?;
                debug!(model = %self.config.model_name, attempt, "llm response received");
                return Ok(LlmResponseData {
                    llm_request_txt: prompt,
                    llm_response_txt: content,
                });
            }

            if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                && attempt < self.config.max_retries
            {
                warn!(%status, attempt, "llm call throttled, backing off");
                sleep(delay).await;
                delay = Duration::from_millis((delay.as_millis() as f64 * 1.8) as u64)
                    + Duration::from_millis(fastrand::u64(0..250));
                continue;
            }

            let err_txt = resp.text().await.unwrap_or_default();
            return Err(DppError::provider(
                PROVIDER_NAME,
                format!("status {status}: {err_txt}"),
            ));
        }
        Err(DppError::provider(PROVIDER_NAME, "retries exhausted"))
    }
}

fn extract_message_content(root: &Value) -> Option<String> {
    root.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn render_prompt_substitutes_known_placeholders_once() {
        let rendered = render_prompt(
            "Summarize {filename}: {text} {unknown}",
            &vars(&[("filename", "a.pdf"), ("text", "literal {filename}")]),
        );
        assert_eq!(rendered, "Summarize a.pdf: literal {filename} {unknown}");
    }

    #[test]
    fn render_prompt_keeps_unbalanced_braces() {
        assert_eq!(render_prompt("json: {\"a\": 1", &BTreeMap::new()), "json: {\"a\": 1");
    }

    #[test]
    fn content_is_read_from_first_choice() {
        let body = json!({ "choices": [{ "message": { "role": "assistant", "content": "ok" } }] });
        assert_eq!(extract_message_content(&body).as_deref(), Some("ok"));
        assert_eq!(extract_message_content(&json!({ "choices": [] })), None);
    }

    #[test]
    fn config_rejects_out_of_range_temperature() {
        let config: LlmProviderConfig =
            serde_yaml::from_str("model_name: gpt-4o-mini\ntemperature: 3.5\n").unwrap();
        assert!(matches!(config.validate(), Err(DppError::Configuration(_))));
    }
}
