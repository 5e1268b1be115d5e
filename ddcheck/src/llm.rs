//! OpenAI-compatible chat completion, used to translate relayed tweets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmSettings;
use crate::{Error, Result};

const TRANSLATE_PROMPT: &str = "用中文翻译用户的输入内容，以下词表不翻译\n[\"Mariring\", \"maririn\"]";

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String>;
}

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Extra delay drawn uniformly from this range on every retry.
    pub jitter: (Duration, Duration),
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: (Duration::from_secs(1), Duration::from_secs(3)),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let (lo, hi) = self.jitter;
        let spread = hi.saturating_sub(lo).as_secs_f64();
        let jitter = lo.as_secs_f64() + spread * rand::random::<f64>();
        Duration::from_secs_f64(base + jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

pub struct LlmClient {
    client: Client,
    settings: LlmSettings,
    policy: BackoffPolicy,
}

impl LlmClient {
    pub fn new(client: Client, settings: LlmSettings) -> Self {
        Self {
            client,
            settings,
            policy: BackoffPolicy::default(),
        }
    }

    pub async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        let request = ChatRequest {
            model: &self.settings.model,
            temperature: self.settings.temperature,
            messages,
            stream: false,
        };

        let mut attempt = 0;
        loop {
            match self.call(&request).await {
                Ok(answer) => return Ok(answer),
                Err(Error::Http(e)) if self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(attempt = attempt + 1, error = %e, ?delay, "Chat completion failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call(&self, request: &ChatRequest<'_>) -> Result<String> {
        let response: ChatResponse = self
            .client
            .post(&self.settings.base_url)
            .bearer_auth(&self.settings.api_key)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Other("chat completion returned no choices".into()))?;
        debug!(chars = answer.chars().count(), "Chat completion received");
        Ok(answer)
    }
}

#[async_trait]
impl Translator for LlmClient {
    async fn translate(&self, text: &str) -> Result<String> {
        self.complete(Some(TRANSLATE_PROMPT), text).await
    }
}
