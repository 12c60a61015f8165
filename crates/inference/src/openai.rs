//! OpenAI-compatible REST adapters (OpenAI, Azure, vLLM, LM Studio, ...).
//!
//! All requests go through the shared HTTP client with the remote-API retry
//! policy: network failures and upstream 5xx are retried with backoff, 4xx
//! responses are fatal and propagated.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Value, json};
use tracing::error;

use mica_core::http_client::HTTP_CLIENT;
use mica_core::models::ModelConfig;
use mica_core::retry::{remote_api_retry_policy, retry_with_policy};

use crate::error::ProviderError;
use crate::provider::{
    ChatMessage, CompletionOptions, EmbedParams, Embedder, LlmCompleter, VisionCompleter,
};

/// POST a JSON body and parse the JSON response, classifying failures into
/// retryable transport errors and fatal remote-API errors.
pub(crate) async fn post_json(
    operation: &str,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
) -> Result<Value, ProviderError> {
    let policy = remote_api_retry_policy();
    retry_with_policy(&policy, operation, || async {
        let mut request = HTTP_CLIENT.post(url).json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| ProviderError::Transport(format!("reading response body: {e}")));
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            error!(%status, operation, "remote API client error (non-retriable)");
            Err(ProviderError::RemoteApi {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(ProviderError::Transport(format!(
                "upstream {status}: {message}"
            )))
        }
    })
    .await
}

fn join_endpoint(base_url: &str, suffix: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with(suffix) {
        base.to_string()
    } else {
        format!("{base}{suffix}")
    }
}

fn parse_embedding_data(body: Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::UnexpectedResponse("missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .cloned()
            .and_then(|v| serde_json::from_value::<Vec<f32>>(v).ok())
            .ok_or_else(|| {
                ProviderError::UnexpectedResponse("missing embedding in data item".to_string())
            })?;
        embeddings.push(embedding);
    }
    Ok(embeddings)
}

fn build_messages(
    prompt: &str,
    system: Option<&str>,
    history: &[ChatMessage],
    content: Option<Value>,
) -> Vec<Value> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in history {
        messages.push(json!({"role": message.role, "content": message.content}));
    }
    match content {
        Some(content) => messages.push(json!({"role": "user", "content": content})),
        None => messages.push(json!({"role": "user", "content": prompt})),
    }
    messages
}

fn extract_message_content(body: &Value) -> Result<String, ProviderError> {
    body.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            ProviderError::UnexpectedResponse("missing choices[0].message.content".to_string())
        })
}

/// OpenAI-compatible embedding adapter.
pub struct OpenAiEmbedder {
    model: String,
    api_key: Option<String>,
    url: String,
    dim: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &ModelConfig) -> Result<Self, ProviderError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let dim = config.embedding_dim.ok_or_else(|| {
            ProviderError::InvalidConfig(format!(
                "remote embedding model '{}' requires embedding_dim",
                config.model_name
            ))
        })?;

        Ok(Self {
            model: config.model_name.clone(),
            api_key: config.api_key.clone(),
            url: join_endpoint(&base_url, "/embeddings"),
            dim,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(
        &self,
        texts: Vec<String>,
        _params: &EmbedParams,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });
        let response = post_json("openai_embed", &self.url, self.api_key.as_deref(), &body).await?;
        parse_embedding_data(response)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// OpenAI-compatible chat completion adapter.
pub struct OpenAiCompleter {
    model: String,
    api_key: Option<String>,
    url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiCompleter {
    pub fn new(config: &ModelConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            model: config.model_name.clone(),
            api_key: config.api_key.clone(),
            url: join_endpoint(&base_url, "/chat/completions"),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn request_body(
        &self,
        messages: Vec<Value>,
        opts: &CompletionOptions,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(temperature) = opts.temperature.or(self.temperature) {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = opts.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }
}

#[async_trait]
impl LlmCompleter for OpenAiCompleter {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let messages = build_messages(prompt, system, history, None);
        let body = self.request_body(messages, opts, false);
        let response =
            post_json("openai_complete", &self.url, self.api_key.as_deref(), &body).await?;
        extract_message_content(&response)
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError> {
        let messages = build_messages(prompt, system, history, None);
        let body = self.request_body(messages, opts, true);

        let mut request = HTTP_CLIENT.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(ProviderError::RemoteApi {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(ProviderError::Transport(format!(
                "upstream {status}: {message}"
            )));
        }

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk
                    .map_err(|e| ProviderError::Transport(format!("stream read failed: {e}")))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Server-sent events: one `data: {json}` line per delta,
                // terminated by `data: [DONE]`.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<Value>(payload) else {
                        continue;
                    };
                    if let Some(delta) = event
                        .pointer("/choices/0/delta/content")
                        .and_then(Value::as_str)
                    {
                        if !delta.is_empty() {
                            yield delta.to_string();
                        }
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// OpenAI-compatible vision adapter. With no images the call reduces to a
/// plain chat completion against the same model.
pub struct OpenAiVisionCompleter {
    completer: OpenAiCompleter,
}

impl OpenAiVisionCompleter {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            completer: OpenAiCompleter::new(config),
        }
    }
}

#[async_trait]
impl VisionCompleter for OpenAiVisionCompleter {
    async fn complete_with_images(
        &self,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
        opts: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        if images.is_empty() {
            return self.completer.complete(prompt, system, &[], opts).await;
        }

        let mut content = vec![json!({"type": "text", "text": prompt})];
        for image in images {
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/jpeg;base64,{image}")},
            }));
        }

        let messages = build_messages(prompt, system, &[], Some(Value::Array(content)));
        let body = self.completer.request_body(messages, opts, false);
        let response = post_json(
            "openai_vision",
            &self.completer.url,
            self.completer.api_key.as_deref(),
            &body,
        )
        .await?;
        extract_message_content(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_suffix_not_duplicated() {
        assert_eq!(
            join_endpoint("https://api.openai.com/v1", "/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            join_endpoint("http://localhost:8080/v1/embeddings/", "/embeddings"),
            "http://localhost:8080/v1/embeddings"
        );
    }

    #[test]
    fn embedding_response_parsed_in_order() {
        let body = json!({
            "data": [
                {"embedding": [0.1, 0.2], "index": 0},
                {"embedding": [0.3, 0.4], "index": 1},
            ]
        });
        let embeddings = parse_embedding_data(body).unwrap();
        assert_eq!(embeddings, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[test]
    fn malformed_embedding_response_is_rejected() {
        let body = json!({"data": [{"no_embedding": true}]});
        assert!(matches!(
            parse_embedding_data(body),
            Err(ProviderError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn messages_ordered_system_history_user() {
        let history = vec![
            ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            },
            ChatMessage {
                role: "assistant".to_string(),
                content: "hello".to_string(),
            },
        ];
        let messages = build_messages("next question", Some("be terse"), &history, None);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(messages[3]["content"], "next question");
    }
}
