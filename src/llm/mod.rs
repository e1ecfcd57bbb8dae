use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde_json::Value;

use crate::config::LlmConfig;

/// Opaque text-generation collaborator. Consumes a prompt, returns
/// text; never part of the routing/merge state machines.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

pub struct OpenAIClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIClient {
    /// Builder failure is fatal: a client without the configured
    /// timeout would hang draft requests indefinitely.
    pub fn new(config: &LlmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn generate(
        &self,
        prompt: &str,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": 1000
            }))
            .send()
            .await?
            .error_for_status()?;

        let result: Value = response.json().await?;
        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        Ok(content)
    }
}

/// Polish an agent's rough reply against the conversation. Degrades
/// gracefully: any provider failure returns the rough text unchanged
/// rather than failing the caller.
pub async fn draft_reply(
    provider: &dyn LLMProvider,
    instructions: Option<&str>,
    conversation: &str,
    base_text: &str,
) -> String {
    let mut prompt = String::from(
        "You are a support agent. Rewrite the draft reply below so it is \
         clear, polite, and grounded in the conversation. Return only the reply.\n\n",
    );
    if let Some(extra) = instructions {
        prompt.push_str("Instructions: ");
        prompt.push_str(extra);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Conversation:\n");
    prompt.push_str(conversation);
    prompt.push_str("\n\nDraft reply:\n");
    prompt.push_str(base_text);

    match provider.generate(&prompt).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => base_text.to_string(),
        Err(err) => {
            warn!("draft generation failed, returning original text: {err}");
            base_text.to_string()
        }
    }
}
