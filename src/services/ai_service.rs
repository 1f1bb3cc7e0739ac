use crate::{
    config::AIConfig,
    error::{ApiError, Result},
    models::ai::{CoachFeature, GenerateTextData},
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Client for the OpenRouter-compatible chat completions API.
///
/// Credits are not handled here; metered routes charge through the credit guard.
pub struct AIService {
    config: AIConfig,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

enum ProviderFailure {
    /// Worth another attempt
    Transient(String),
    Fatal(ApiError),
}

impl AIService {
    pub fn new(config: &AIConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.openrouter.request_timeout_ms,
            ))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config: config.clone(),
            http_client,
        })
    }

    /// Run one resume-coaching prompt through the provider
    #[instrument(skip(self, prompt, job_description), fields(feature = feature.as_str()))]
    pub async fn generate_text(
        &self,
        feature: CoachFeature,
        prompt: &str,
        job_description: Option<&str>,
    ) -> Result<GenerateTextData> {
        let user_content = match job_description {
            Some(job) if !job.trim().is_empty() => {
                format!("{}\n\nJob description:\n{}", prompt, job)
            }
            _ => prompt.to_string(),
        };

        let request = OpenAIRequest {
            model: self.config.openrouter.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: feature.system_prompt().to_string(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: user_content,
                },
            ],
            max_tokens: self.config.openrouter.max_tokens,
            temperature: self.config.openrouter.temperature,
        };

        let content = self.call_openrouter_api(request).await?;
        info!("Generated {} characters", content.len());

        Ok(GenerateTextData {
            feature,
            content,
            model: self.config.openrouter.model.clone(),
        })
    }

    /// POST to the provider, retrying per `openrouter.retry`
    async fn call_openrouter_api(&self, request: OpenAIRequest) -> Result<String> {
        let retry = &self.config.openrouter.retry;
        let mut attempt: u8 = 0;

        loop {
            let failure = match self.send_once(&request).await {
                Ok(content) => return Ok(content),
                Err(ProviderFailure::Fatal(e)) => return Err(e),
                Err(ProviderFailure::Transient(message)) => message,
            };

            if attempt >= retry.attempts {
                return Err(ApiError::AIProvider(failure));
            }
            attempt += 1;
            warn!(attempt, max = retry.attempts, "{}, retrying", failure);
            tokio::time::sleep(retry.delay(attempt)).await;
        }
    }

    async fn send_once(&self, request: &OpenAIRequest) -> std::result::Result<String, ProviderFailure> {
        let openrouter = &self.config.openrouter;
        let mut builder = self
            .http_client
            .post(format!("{}/chat/completions", openrouter.api_base))
            .bearer_auth(&openrouter.api_key);

        if let Some(ref referer) = openrouter.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(ref title) = openrouter.app_title {
            builder = builder.header("X-Title", title);
        }

        let resp = builder
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderFailure::Transient(format!("OpenRouter request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = format!("OpenRouter error {}: {}", status.as_u16(), text);
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    ProviderFailure::Transient(message)
                } else {
                    ProviderFailure::Fatal(ApiError::AIProvider(message))
                },
            );
        }

        let body: OpenAIResponse = resp.json().await.map_err(|e| {
            ProviderFailure::Fatal(ApiError::AIProvider(format!(
                "Failed to parse response: {}",
                e
            )))
        })?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderFailure::Fatal(ApiError::AIProvider("No choices in response".to_string()))
            })
    }
}
