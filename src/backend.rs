use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::BackendConfig;
use crate::structure::GenerationError;

const SYSTEM_PROMPT: &str =
    "You design structured language lessons. Reply with one JSON object and no commentary.";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A text generator reachable over some transport. One prompt in, raw text out.
pub trait GenerativeBackend {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `chat/completions` client.
pub struct ChatCompletionsBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsBackend {
    pub fn new(config: &BackendConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn from_env(config: &BackendConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("environment variable {} is not set", config.api_key_env))?;
        Self::new(config, api_key)
    }
}

impl GenerativeBackend for ChatCompletionsBackend {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "unknown error".to_string());
            let message = format!("status {}: {}", status.as_u16(), body.trim());
            return Err(if status.as_u16() == 429 {
                GenerationError::RateLimited(message)
            } else {
                GenerationError::Backend(message)
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .map_err(|err| GenerationError::Backend(format!("unreadable response: {err}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Backend("response has no message content".to_string()))
    }
}

fn map_http_error(error: reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Backend(format!("request timeout: {error}"))
    } else if error.is_connect() {
        GenerationError::Backend(format!("connection error: {error}"))
    } else {
        GenerationError::Backend(format!("http error: {error}"))
    }
}

/// Repeats transient backend failures up to `max_attempts` calls in total.
pub struct RetryingBackend<B> {
    inner: B,
    max_attempts: u32,
    delay: Duration,
}

impl<B: GenerativeBackend> RetryingBackend<B> {
    pub fn new(inner: B, max_attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl<B: GenerativeBackend> GenerativeBackend for RetryingBackend<B> {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut attempt = 1;
        loop {
            match self.inner.generate(prompt) {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "retrying backend call"
                    );
                    thread::sleep(self.delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct FlakyBackend {
        failures_left: Cell<u32>,
        calls: Cell<u32>,
        failure: fn() -> GenerationError,
    }

    impl GenerativeBackend for FlakyBackend {
        fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err((self.failure)());
            }
            Ok("{}".to_string())
        }
    }

    fn flaky(failures: u32, failure: fn() -> GenerationError) -> FlakyBackend {
        FlakyBackend {
            failures_left: Cell::new(failures),
            calls: Cell::new(0),
            failure,
        }
    }

    #[test]
    fn retries_transient_failures_until_success() {
        let backend = RetryingBackend::new(
            flaky(2, || GenerationError::RateLimited("slow down".into())),
            3,
            Duration::ZERO,
        );
        assert_eq!(backend.generate("p").unwrap(), "{}");
        assert_eq!(backend.inner.calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let backend = RetryingBackend::new(
            flaky(5, || GenerationError::Backend("down".into())),
            2,
            Duration::ZERO,
        );
        assert!(backend.generate("p").is_err());
        assert_eq!(backend.inner.calls.get(), 2);
    }

    #[test]
    fn does_not_retry_parse_failures() {
        let backend = RetryingBackend::new(flaky(1, || GenerationError::NoJson), 3, Duration::ZERO);
        assert!(matches!(backend.generate("p"), Err(GenerationError::NoJson)));
        assert_eq!(backend.inner.calls.get(), 1);
    }

    #[test]
    fn request_serializes_chat_messages() {
        let request = ChatCompletionRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.5,
            max_tokens: 10,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 10);
    }
}
