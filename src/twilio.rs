//! Outbound MMS through the Twilio REST API.

use crate::errors::Error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.twilio.com";

#[async_trait]
pub trait Messenger: Send + Sync {
    // Ask the provider to send an MMS to `to` with the media found at `media_url`.
    async fn send_mms(&self, to: &str, media_url: &Url, status_callback: &Url)
        -> Result<(), Error>;
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TwilioConfig {
    /// Account SID.
    pub sid: String,
    pub auth_token: String,
    /// The Twilio number messages are sent from, e.g. +14071111111.
    pub sender_number: String,
    /// Override for the API host, mostly useful for testing.
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct TwilioMessenger {
    http: reqwest::Client,
    config: TwilioConfig,
    messages_url: Url,
}

impl TwilioMessenger {
    pub fn new(config: TwilioConfig) -> Result<Self, Error> {
        if config.sid.is_empty() {
            return Err(Error::Config("twilio sid is empty".into()));
        }
        if config.auth_token.is_empty() {
            return Err(Error::Config("twilio auth token is empty".into()));
        }
        if config.sender_number.is_empty() {
            return Err(Error::Config("twilio sender number is empty".into()));
        }

        let base = config
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        let messages_url = Url::parse(&format!(
            "{base}/2010-04-01/Accounts/{}/Messages.json",
            config.sid
        ))?;

        Ok(Self {
            http: reqwest::Client::new(),
            config,
            messages_url,
        })
    }
}

#[async_trait]
impl Messenger for TwilioMessenger {
    async fn send_mms(
        &self,
        to: &str,
        media_url: &Url,
        status_callback: &Url,
    ) -> Result<(), Error> {
        tracing::debug!(to, %media_url, "requesting MMS from twilio");
        let resp = self
            .http
            .post(self.messages_url.clone())
            .basic_auth(&self.config.sid, Some(&self.config.auth_token))
            .form(&[
                ("From", self.config.sender_number.as_str()),
                ("To", to),
                ("MediaUrl", media_url.as_str()),
                ("StatusCallback", status_callback.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|err| err.message)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("Unknown").to_string());
            return Err(Error::Messaging {
                status: status.as_u16(),
                message,
            });
        }

        let message: MessageResource = resp.json().await?;
        tracing::info!(sid = %message.sid, status = ?message.status, to, "MMS accepted by twilio");
        Ok(())
    }
}
