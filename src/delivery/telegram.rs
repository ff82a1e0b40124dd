//! Telegram Bot API delivery channel
//!
//! Albums of two or more images go out through `sendMediaGroup`; a single
//! image through `sendPhoto`, since the Bot API rejects one-item groups.
//! Both are multipart uploads of the staged bytes.

use super::{DeliveryChannel, MediaItem};
use crate::config::BotConfig;
use crate::error::{DeliveryError, Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PARSE_MODE: &str = "Markdown";

/// Delivery channel backed by a Telegram bot
#[derive(Clone, Debug)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

/// Envelope every Bot API method answers with
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// `InputMediaPhoto` entry of the `media` field
#[derive(Debug, Serialize)]
struct InputMediaPhoto<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

impl TelegramChannel {
    /// Build a channel from the bot settings
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no bot token is configured.
    pub fn new(settings: &BotConfig) -> Result<Self> {
        let token = settings.token.clone().ok_or_else(|| Error::Config {
            message: "a bot token is required for Telegram delivery".to_string(),
            key: Some("bot.token".to_string()),
        })?;

        let client = reqwest::Client::builder()
            .timeout(settings.send_timeout)
            .build()?;

        Ok(Self::with_client(client, settings.api_base.clone(), token))
    }

    /// Use an existing HTTP client
    pub fn with_client(
        client: reqwest::Client,
        api_base: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn photo_form(target: &str, item: &MediaItem) -> Form {
        let mut form = Form::new().text("chat_id", target.to_string()).part(
            "photo",
            Part::bytes(item.bytes.clone()).file_name(item.filename.clone()),
        );
        if let Some(caption) = &item.caption {
            form = form
                .text("caption", caption.clone())
                .text("parse_mode", PARSE_MODE);
        }
        form
    }

    fn media_group_form(
        target: &str,
        album: &[MediaItem],
    ) -> std::result::Result<Form, DeliveryError> {
        let media: Vec<InputMediaPhoto<'_>> = album
            .iter()
            .enumerate()
            .map(|(index, item)| InputMediaPhoto {
                kind: "photo",
                media: format!("attach://file{index}"),
                caption: item.caption.as_deref(),
                parse_mode: item.caption.as_ref().map(|_| PARSE_MODE),
            })
            .collect();
        let media = serde_json::to_string(&media)
            .map_err(|e| DeliveryError::Rejected(format!("cannot encode media list: {e}")))?;

        let mut form = Form::new()
            .text("chat_id", target.to_string())
            .text("media", media);
        for (index, item) in album.iter().enumerate() {
            form = form.part(
                format!("file{index}"),
                Part::bytes(item.bytes.clone()).file_name(item.filename.clone()),
            );
        }
        Ok(form)
    }

    async fn call(&self, method: &str, form: Form) -> std::result::Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(classify_transport)?;
        let parsed: Option<ApiResponse> = serde_json::from_slice(&body).ok();

        let rate_limited = status.as_u16() == 429
            || parsed.as_ref().and_then(|r| r.error_code) == Some(429);
        if rate_limited {
            let retry_after = parsed
                .as_ref()
                .and_then(|r| r.parameters.as_ref())
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs);
            return Err(DeliveryError::RateLimited { retry_after });
        }

        match parsed {
            Some(api) if status.is_success() && api.ok => Ok(()),
            Some(api) => Err(DeliveryError::Rejected(
                api.description
                    .unwrap_or_else(|| format!("{method} failed with HTTP {status}")),
            )),
            None if status.is_server_error() => Err(DeliveryError::Transport(format!(
                "{method} failed with HTTP {status}"
            ))),
            None => Err(DeliveryError::Rejected(format!(
                "{method} returned an unreadable response (HTTP {status})"
            ))),
        }
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send_album(
        &self,
        target: &str,
        album: &[MediaItem],
    ) -> std::result::Result<(), DeliveryError> {
        match album {
            [] => Ok(()),
            [single] => self.call("sendPhoto", Self::photo_form(target, single)).await,
            _ => {
                let form = Self::media_group_form(target, album)?;
                self.call("sendMediaGroup", form).await
            }
        }
    }
}

fn classify_transport(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Timeout
    } else {
        DeliveryError::Transport(e.to_string())
    }
}
