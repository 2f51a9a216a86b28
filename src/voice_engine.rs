//! VoiceEngineClient (§6): the third-party voice-AI engine this system
//! drives but does not implement.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// §5: short enough that a hung voice-engine peer can't block a user's
/// processing latch indefinitely.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum VoiceEngineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CallMedium {
    pub provider: String,
    pub incoming: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCallRequest {
    pub medium: CallMedium,
    #[serde(rename = "maxDuration")]
    pub max_duration_secs: i32,
    #[serde(rename = "recordingEnabled")]
    pub recording_enabled: bool,
    #[serde(rename = "correlationTags")]
    pub correlation_tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreateCallResponse {
    pub engine_call_id: String,
    pub join_url: String,
}

#[derive(Debug, Clone)]
pub struct CallDetails {
    pub joined_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub billed_duration: Option<i32>,
    pub summary: Option<String>,
    pub recording_url: Option<String>,
}

/// `§4.4`'s collaborator contract. Only the three operations the scheduler
/// core actually calls are modeled; agent/voice/knowledge-corpus management
/// is the engine's own concern (§1 non-goal).
#[async_trait]
pub trait VoiceEngineClient: Send + Sync {
    async fn create_call(
        &self,
        agent_id: &str,
        request: CreateCallRequest,
    ) -> Result<CreateCallResponse, VoiceEngineError>;

    async fn get_call_details(&self, engine_call_id: &str) -> Result<CallDetails, VoiceEngineError>;

    async fn create_webhook(
        &self,
        url: &str,
        events: &[&str],
        agent_id: Option<&str>,
        secret: Option<&str>,
    ) -> Result<String, VoiceEngineError>;

    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), VoiceEngineError>;
}

#[derive(Clone)]
pub struct HttpVoiceEngineClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HttpVoiceEngineClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build voice engine http client"),
            api_key,
            base_url,
        }
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, VoiceEngineError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(VoiceEngineError::Api { status, message });
        }

        Ok(response.json().await?)
    }
}

#[derive(Serialize)]
struct CreateCallWireRequest<'a> {
    #[serde(rename = "agentId")]
    agent_id: &'a str,
    medium: &'a CallMedium,
    #[serde(rename = "maxDuration")]
    max_duration_secs: i32,
    #[serde(rename = "recordingEnabled")]
    recording_enabled: bool,
    #[serde(rename = "correlationTags")]
    correlation_tags: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
struct CreateCallWireResponse {
    #[serde(rename = "callId")]
    call_id: String,
    #[serde(rename = "joinUrl")]
    join_url: String,
}

#[derive(Deserialize)]
struct CallDetailsWireResponse {
    #[serde(rename = "joinedAt")]
    joined_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "endedAt")]
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "billedDuration")]
    billed_duration: Option<i32>,
    summary: Option<String>,
    #[serde(rename = "recordingUrl")]
    recording_url: Option<String>,
}

#[derive(Serialize)]
struct CreateWebhookRequest<'a> {
    url: &'a str,
    events: &'a [&'a str],
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    agent_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateWebhookResponse {
    id: String,
}

#[async_trait]
impl VoiceEngineClient for HttpVoiceEngineClient {
    async fn create_call(
        &self,
        agent_id: &str,
        request: CreateCallRequest,
    ) -> Result<CreateCallResponse, VoiceEngineError> {
        let wire = CreateCallWireRequest {
            agent_id,
            medium: &request.medium,
            max_duration_secs: request.max_duration_secs,
            recording_enabled: request.recording_enabled,
            correlation_tags: &request.correlation_tags,
        };
        let response: CreateCallWireResponse = self.post("/calls", &wire).await?;
        Ok(CreateCallResponse {
            engine_call_id: response.call_id,
            join_url: response.join_url,
        })
    }

    async fn get_call_details(&self, engine_call_id: &str) -> Result<CallDetails, VoiceEngineError> {
        let response = self
            .client
            .get(format!("{}/calls/{}", self.base_url, engine_call_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(VoiceEngineError::Api { status, message });
        }

        let body: CallDetailsWireResponse = response.json().await?;
        Ok(CallDetails {
            joined_at: body.joined_at,
            ended_at: body.ended_at,
            billed_duration: body.billed_duration,
            summary: body.summary,
            recording_url: body.recording_url,
        })
    }

    async fn create_webhook(
        &self,
        url: &str,
        events: &[&str],
        agent_id: Option<&str>,
        secret: Option<&str>,
    ) -> Result<String, VoiceEngineError> {
        let request = CreateWebhookRequest {
            url,
            events,
            agent_id,
            secret,
        };
        let response: CreateWebhookResponse = self.post("/webhooks", &request).await?;
        Ok(response.id)
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), VoiceEngineError> {
        let response = self
            .client
            .delete(format!("{}/webhooks/{}", self.base_url, webhook_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(VoiceEngineError::Api { status, message });
        }
        Ok(())
    }
}
