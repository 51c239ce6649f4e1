// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod auth;
pub mod cache;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use wisedeck_app::ToolDef;

pub use auth::{AuthType, Token, load_token};
pub use cache::CatalogCache;

const PROTOCOL_VERSION: &str = "2025-06-18";
const CLIENT_NAME: &str = "wisedeck";

/// JSON-RPC 2.0 client for the remote tool service. One `initialize`
/// handshake per client; `tools/list` and `tools/call` share the session
/// and the underlying connection.
pub struct Client {
    endpoint: String,
    token: Option<String>,
    http: HttpClient,
    next_id: u64,
    initialized: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CallOutcome {
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "structuredContent")]
    pub structured_content: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl CallOutcome {
    /// Concatenated text blocks; the pretty-printer falls back to
    /// `structured_content` when this is empty.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Client {
    pub fn new(endpoint: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_owned();
        if endpoint.is_empty() {
            bail!("api.base_url must not be empty");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            endpoint,
            token: token.map(str::to_owned),
            http,
            next_id: 0,
            initialized: false,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn list_tools(&mut self) -> Result<Vec<ToolDef>> {
        self.ensure_initialized()?;

        let mut tools: Vec<ToolDef> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request("tools/list", params)?;
            let page: ToolPage =
                serde_json::from_value(result).context("decode tool catalog page")?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    pub fn call_tool(&mut self, name: &str, arguments: Map<String, Value>) -> Result<CallOutcome> {
        self.ensure_initialized()?;
        let result = self.request(
            "tools/call",
            json!({ "name": name, "arguments": Value::Object(arguments) }),
        )?;
        serde_json::from_value(result).context("decode tool call result")
    }

    fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": CLIENT_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )?;
        self.notify("notifications/initialized")?;
        self.initialized = true;
        Ok(())
    }

    fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: Some(self.next_id),
            method,
            params,
        };
        let response = self.post(&body)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }

        let payload = unwrap_event_stream(&response.text().context("read response body")?);
        let decoded: RpcResponse = serde_json::from_str(&payload)
            .with_context(|| format!("decode {method} response"))?;
        if let Some(error) = decoded.error {
            bail!("{method} failed ({}): {}", error.code, error.message);
        }
        decoded
            .result
            .ok_or_else(|| anyhow!("{method} response carries neither result nor error"))
    }

    fn notify(&mut self, method: &str) -> Result<()> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: json!({}),
        };
        self.post(&body)?;
        Ok(())
    }

    fn post(&self, body: &RpcRequest<'_>) -> Result<Response> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .map_err(|error| connection_error(&self.endpoint, error))
    }
}

/// Servers may answer a POST with a one-shot SSE stream; the first `data:`
/// payload is the JSON-RPC response.
fn unwrap_event_stream(body: &str) -> String {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return body.to_owned();
    }
    for line in body.lines() {
        if let Some(payload) = line.strip_prefix("data:") {
            return payload.trim().to_owned();
        }
    }
    body.to_owned()
}

fn connection_error(endpoint: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!(
        "cannot reach {} -- check the network and [api] base_url ({})",
        endpoint,
        error
    )
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return anyhow!(
            "server rejected the access token ({}); set WISEDECK_TOKEN or refresh your saved credentials",
            status.as_u16()
        );
    }

    if let Ok(parsed) = serde_json::from_str::<RpcResponse>(body)
        && let Some(error) = parsed.error
        && !error.message.is_empty()
    {
        return anyhow!("server error ({}): {}", status.as_u16(), error.message);
    }

    if body.len() < 200 && !body.contains('{') && !body.trim().is_empty() {
        return anyhow!("server error ({}): {}", status.as_u16(), body.trim());
    }

    anyhow!("server returned {}", status.as_u16())
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolPage {
    #[serde(default)]
    tools: Vec<ToolDef>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}
