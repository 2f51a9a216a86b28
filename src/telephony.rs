//! TelephonyClient (§6): bridges a real outbound call into a voice-engine
//! join URL. One implementation per provider tag, reusing the Telnyx-style
//! request/response shape the teacher's `TelnyxClient` already dials with
//! and extending the same pattern to the other two provider tags (§9).

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// §5: short enough that a hung telephony-provider peer can't block a
/// user's processing latch indefinitely.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("failed to build telephony http client")
}

#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("no client configured for provider {0}")]
    UnknownProvider(String),
}

#[derive(Debug, Clone)]
pub struct BridgeResult {
    pub provider_call_id: String,
}

/// `bridge(provider, fromPhone, toPhone, joinUrl, correlationTags)` (§6).
#[async_trait]
pub trait TelephonyClient: Send + Sync {
    async fn bridge(
        &self,
        from_phone: &str,
        to_phone: &str,
        join_url: &str,
        correlation_tags: &HashMap<String, String>,
    ) -> Result<BridgeResult, TelephonyError>;
}

/// Dispatches `bridge` to the client registered for `outboundMedium.provider`.
pub struct TelephonyRegistry {
    clients: HashMap<String, Box<dyn TelephonyClient>>,
}

impl TelephonyRegistry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: impl Into<String>, client: Box<dyn TelephonyClient>) {
        self.clients.insert(provider.into(), client);
    }

    pub async fn bridge(
        &self,
        provider: &str,
        from_phone: &str,
        to_phone: &str,
        join_url: &str,
        correlation_tags: &HashMap<String, String>,
    ) -> Result<BridgeResult, TelephonyError> {
        let client = self
            .clients
            .get(provider)
            .ok_or_else(|| TelephonyError::UnknownProvider(provider.to_string()))?;
        client.bridge(from_phone, to_phone, join_url, correlation_tags).await
    }
}

impl Default for TelephonyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn status_callback_url(base: &str, path: &str, correlation_tags: &HashMap<String, String>) -> String {
    let query: String = correlation_tags
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}{path}?{query}")
}

/// Twilio-style provider: `<Connect><Stream url="…"/></Connect>` TwiML.
#[derive(Clone)]
pub struct TwilioStyleClient {
    client: Client,
    account_sid: String,
    auth_token: String,
    status_callback_base: String,
}

impl TwilioStyleClient {
    pub fn new(account_sid: String, auth_token: String, status_callback_base: String) -> Self {
        Self {
            client: http_client(),
            account_sid,
            auth_token,
            status_callback_base,
        }
    }
}

#[async_trait]
impl TelephonyClient for TwilioStyleClient {
    async fn bridge(
        &self,
        from_phone: &str,
        to_phone: &str,
        join_url: &str,
        correlation_tags: &HashMap<String, String>,
    ) -> Result<BridgeResult, TelephonyError> {
        let twiml = format!(
            r#"<Response><Connect><Stream url="{join_url}"/></Connect></Response>"#
        );
        let status_callback = status_callback_url(
            &self.status_callback_base,
            "/webhook/twilio/status",
            correlation_tags,
        );

        let response = self
            .client
            .post(format!(
                "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
                self.account_sid
            ))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", from_phone),
                ("To", to_phone),
                ("Twiml", twiml.as_str()),
                ("StatusCallback", status_callback.as_str()),
                (
                    "StatusCallbackEvent",
                    "initiated ringing answered completed",
                ),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Api { status, message });
        }

        let body: TwilioCallResponse = response.json().await?;
        Ok(BridgeResult {
            provider_call_id: body.sid,
        })
    }
}

#[derive(serde::Deserialize)]
struct TwilioCallResponse {
    sid: String,
}

/// Plivo-style provider.
#[derive(Clone)]
pub struct PlivoStyleClient {
    client: Client,
    auth_id: String,
    auth_token: String,
    status_callback_base: String,
}

impl PlivoStyleClient {
    pub fn new(auth_id: String, auth_token: String, status_callback_base: String) -> Self {
        Self {
            client: http_client(),
            auth_id,
            auth_token,
            status_callback_base,
        }
    }
}

#[derive(Serialize)]
struct PlivoCallRequest<'a> {
    from: &'a str,
    to: &'a str,
    answer_url: &'a str,
    answer_method: &'a str,
    hangup_url: &'a str,
}

#[derive(serde::Deserialize)]
struct PlivoCallResponse {
    #[serde(rename = "request_uuid")]
    request_uuid: String,
}

#[async_trait]
impl TelephonyClient for PlivoStyleClient {
    async fn bridge(
        &self,
        from_phone: &str,
        to_phone: &str,
        join_url: &str,
        correlation_tags: &HashMap<String, String>,
    ) -> Result<BridgeResult, TelephonyError> {
        let hangup_url = status_callback_url(
            &self.status_callback_base,
            "/webhook/plivo/status",
            correlation_tags,
        );

        let request = PlivoCallRequest {
            from: from_phone,
            to: to_phone,
            answer_url: join_url,
            answer_method: "POST",
            hangup_url: &hangup_url,
        };

        let response = self
            .client
            .post(format!(
                "https://api.plivo.com/v1/Account/{}/Call/",
                self.auth_id
            ))
            .basic_auth(&self.auth_id, Some(&self.auth_token))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Api { status, message });
        }

        let body: PlivoCallResponse = response.json().await?;
        Ok(BridgeResult {
            provider_call_id: body.request_uuid,
        })
    }
}

/// Telnyx-style provider, following the dial/bridge shape of the teacher's
/// own `TelnyxClient`.
#[derive(Clone)]
pub struct TelnyxStyleClient {
    client: Client,
    api_key: String,
    connection_id: String,
    status_callback_base: String,
}

impl TelnyxStyleClient {
    pub fn new(api_key: String, connection_id: String, status_callback_base: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            connection_id,
            status_callback_base,
        }
    }
}

#[derive(Serialize)]
struct TelnyxDialRequest<'a> {
    to: &'a str,
    from: &'a str,
    connection_id: &'a str,
    webhook_url: &'a str,
    webhook_url_method: &'a str,
    #[serde(rename = "stream_url")]
    stream_url: &'a str,
    #[serde(rename = "stream_track")]
    stream_track: &'a str,
}

#[derive(serde::Deserialize)]
struct TelnyxDialResponse {
    data: TelnyxDialData,
}

#[derive(serde::Deserialize)]
struct TelnyxDialData {
    call_control_id: String,
}

#[async_trait]
impl TelephonyClient for TelnyxStyleClient {
    async fn bridge(
        &self,
        from_phone: &str,
        to_phone: &str,
        join_url: &str,
        correlation_tags: &HashMap<String, String>,
    ) -> Result<BridgeResult, TelephonyError> {
        let webhook_url = status_callback_url(
            &self.status_callback_base,
            "/webhook/telnyx/status",
            correlation_tags,
        );

        let request = TelnyxDialRequest {
            to: to_phone,
            from: from_phone,
            connection_id: &self.connection_id,
            webhook_url: &webhook_url,
            webhook_url_method: "POST",
            stream_url: join_url,
            stream_track: "both_tracks",
        };

        let response = self
            .client
            .post("https://api.telnyx.com/v2/calls")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Api { status, message });
        }

        let body: TelnyxDialResponse = response.json().await?;
        Ok(BridgeResult {
            provider_call_id: body.data.call_control_id,
        })
    }
}
