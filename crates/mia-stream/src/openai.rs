use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, warn};

use mia_core::config::OpenAiProfile;

use crate::error::TransportError;
use crate::transport::{ChunkStream, Transport};
use crate::wire::{ChatCompletionReply, ChatCompletionRequest};

const CHAT_PATH: &str = "/v1/chat/completions";

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiClient {
    client: reqwest::Client,
    name: String,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(profile: &OpenAiProfile) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: profile.name.clone(),
            endpoint: profile.endpoint.trim_end_matches('/').to_string(),
            // an empty key means "no auth header", e.g. behind a key-injecting proxy
            api_key: profile.api_key.clone().filter(|k| !k.is_empty()),
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.endpoint, CHAT_PATH)
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(self.url())
            .header("content-type", "application/json");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Probe the key with an empty request body.
    ///
    /// The API answers 401 for a bad key and 400 (missing `model`) for a good one.
    pub async fn check_api_key_valid(&self) -> Result<bool, TransportError> {
        let resp = self.post().json(&serde_json::json!({})).send().await?;

        match resp.status().as_u16() {
            401 => Ok(false),
            400 => Ok(true),
            status => {
                let text = resp.text().await.unwrap_or_default();
                warn!(status, body = %text, "unexpected response while checking API key");
                Ok(false)
            }
        }
    }

    /// Non-streaming completion.
    pub async fn create_chat_completions(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionReply, TransportError> {
        debug!(model = %req.model, profile = %self.name, "sending chat completion request");

        let resp = self.post().json(req).send().await?;

        if resp.status().as_u16() != 200 {
            return Err(api_error(resp).await);
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Transport for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<ChunkStream, TransportError> {
        let body = request.streaming();
        debug!(model = %body.model, profile = %self.name, "sending streaming request");

        let resp = self.post().json(&body).send().await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Stream(e.to_string())));
        Ok(Box::pin(stream))
    }
}

async fn api_error(resp: reqwest::Response) -> TransportError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    warn!(status, body = %text, "chat completions API error");
    TransportError::Api {
        status,
        message: text,
    }
}
