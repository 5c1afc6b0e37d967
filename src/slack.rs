//! Slack Web API client.
//!
//! Implements [`ChatTransport`] over `https://slack.com/api` with a bot
//! token. Every method response carries an `ok` flag; a `false` value is
//! turned into an error carrying Slack's `error` code.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::transport::{BotIdentity, ChannelInfo, ChatTransport};

const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Bot-token client for the Slack Web API.
pub struct SlackWebClient {
    client: Client,
    token: String,
    api_base: String,
    file_timeout: Duration,
}

#[derive(Deserialize)]
struct SlackApiResponse {
    ok: bool,
    error: Option<String>,
}

impl SlackWebClient {
    /// `file_timeout` bounds attachment downloads; API calls use a fixed 30s.
    pub fn new(token: impl Into<String>, file_timeout: Duration) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            bail!("Slack bot token is empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            file_timeout,
        })
    }

    /// Point the client at a different API root, e.g. a local mock.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn api_get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("send slack {} request", method))?;
        read_api_response(method, response).await
    }

    async fn api_post(&self, method: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("send slack {} request", method))?;
        read_api_response(method, response).await
    }
}

async fn read_api_response(method: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let payload = response
        .text()
        .await
        .with_context(|| format!("read slack {} response", method))?;
    if !status.is_success() {
        bail!("slack {} failed: {} {}", method, status, payload);
    }
    let parsed: Value = serde_json::from_str(&payload)
        .with_context(|| format!("parse slack {} response", method))?;
    check_ok(method, &parsed)?;
    Ok(parsed)
}

fn check_ok(method: &str, payload: &Value) -> Result<()> {
    let ok = SlackApiResponse::deserialize(payload)
        .with_context(|| format!("parse slack {} ok flag", method))?;
    if !ok.ok {
        bail!(
            "slack {} error: {}",
            method,
            ok.error.unwrap_or_else(|| "unknown_error".to_string())
        );
    }
    Ok(())
}

fn parse_channel_info(payload: &Value) -> Result<ChannelInfo> {
    let channel = payload
        .get("channel")
        .ok_or_else(|| anyhow!("conversations.info response has no channel"))?;
    Ok(ChannelInfo {
        name: channel
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        is_im: channel.get("is_im").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_identity(payload: &Value) -> Result<BotIdentity> {
    let user_id = payload
        .get("user_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("auth.test response has no user_id"))?;
    Ok(BotIdentity {
        user_id: user_id.to_string(),
    })
}

fn post_message_body(channel_id: &str, thread_ts: Option<&str>, text: &str) -> Value {
    let mut body = json!({ "channel": channel_id, "text": text });
    if let Some(ts) = thread_ts {
        body["thread_ts"] = json!(ts);
    }
    body
}

#[async_trait]
impl ChatTransport for SlackWebClient {
    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        let payload = self
            .api_get("conversations.info", &[("channel", channel_id)])
            .await?;
        parse_channel_info(&payload)
    }

    async fn bot_identity(&self) -> Result<BotIdentity> {
        let payload = self.api_post("auth.test", json!({})).await?;
        parse_identity(&payload)
    }

    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .timeout(self.file_timeout)
            .send()
            .await
            .context("download slack file")?
            .error_for_status()
            .context("download slack file")?;
        let bytes = response.bytes().await.context("read slack file body")?;
        Ok(bytes.to_vec())
    }

    async fn post_reply(&self, channel_id: &str, thread_ts: Option<&str>, text: &str) -> Result<()> {
        self.api_post("chat.postMessage", post_message_body(channel_id, thread_ts, text))
            .await?;
        Ok(())
    }
}
