//! OneBot v11 HTTP transport.
//!
//! Posts to `{base_url}/send_group_msg`. A non-2xx status or a non-zero
//! `retcode` in the body is a delivery failure. Nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{GroupMessage, MessageSender};
use crate::config::OneBotSettings;
use crate::domain::GroupId;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    wording: Option<String>,
}

pub struct OneBotSender {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
}

impl OneBotSender {
    pub fn new(settings: &OneBotSettings) -> Result<Self> {
        let client = live_probe::create_client_builder(Duration::from_secs(
            settings.request_timeout_secs,
        ))
        .build()?;
        Ok(Self::with_client(
            client,
            &settings.base_url,
            settings.access_token.clone(),
        ))
    }

    pub fn with_client(client: Client, base_url: &str, access_token: Option<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}/send_group_msg", base_url.trim_end_matches('/')),
            access_token: access_token.filter(|t| !t.is_empty()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MessageSender for OneBotSender {
    fn sender_type(&self) -> &'static str {
        "onebot"
    }

    async fn send_group_message(&self, group: GroupId, message: &GroupMessage) -> Result<()> {
        let payload = json!({
            "group_id": group,
            "message": message.to_onebot(),
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::delivery(group, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::delivery(group, format!("HTTP {status}: {body}")));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::delivery(group, format!("invalid response: {e}")))?;
        check_response(group, &body)?;

        debug!(group, "Group message delivered");
        Ok(())
    }
}

fn check_response(group: GroupId, body: &ApiResponse) -> Result<()> {
    if body.retcode == 0 && body.status != "failed" {
        return Ok(());
    }
    let reason = body
        .wording
        .as_deref()
        .or(body.message.as_deref())
        .unwrap_or("unknown error");
    Err(Error::delivery(
        group,
        format!("retcode {}: {reason}", body.retcode),
    ))
}
