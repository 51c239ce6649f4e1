// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;
use wisedeck_app::ToolDef;
use wisedeck_mcp::{CallOutcome, Client, cache, load_token};
use wisedeck_tui::{AppRuntime, InternalEvent, ToolResult};

use crate::config::Config;

/// Bridges the TUI to the JSON-RPC service: catalog loading through the
/// 24-hour cache, token resolution immediately before each call, and the
/// invocation itself on a worker thread so the spinner keeps turning.
pub struct McpRuntime {
    base_url: String,
    timeout: Duration,
    cache_ttl_hours: i64,
    cache_file: PathBuf,
    force_refresh: bool,
    client: Option<Client>,
}

impl McpRuntime {
    pub fn new(config: &Config, force_refresh: bool) -> Result<Self> {
        let base_url = config.base_url().to_owned();
        let cache_dir = cache::cache_dir()?;
        let cache_file = cache::cache_path(&cache_dir, &base_url);
        Ok(Self {
            base_url,
            timeout: config.timeout()?,
            cache_ttl_hours: config.cache_ttl_hours(),
            cache_file,
            force_refresh,
            client: None,
        })
    }

    fn client(&mut self) -> Result<&mut Client> {
        if self.client.is_none() {
            let token = load_token()?;
            self.client = Some(Client::new(
                &self.base_url,
                Some(&token.access_token),
                self.timeout,
            )?);
        }
        self.client
            .as_mut()
            .context("client should be initialized")
    }

    /// Cache hit unless forced; a fetch rewrites the cache best-effort (a
    /// read-only config dir must not break the session).
    fn load_catalog(&mut self, force_refresh: bool) -> Result<Vec<ToolDef>> {
        if !force_refresh
            && let Some(tools) = cache::load(&self.cache_file, self.cache_ttl_hours)
        {
            return Ok(tools);
        }

        let tools = self.client()?.list_tools()?;
        let _ = cache::store(&self.cache_file, &tools);
        Ok(tools)
    }

    /// Synchronous invocation for the non-interactive command path.
    pub fn call_tool(&mut self, name: &str, arguments: Map<String, Value>) -> Result<CallOutcome> {
        self.client()?.call_tool(name, arguments)
    }
}

fn map_outcome(outcome: CallOutcome) -> ToolResult {
    ToolResult {
        is_error: outcome.is_error,
        content: outcome
            .content
            .iter()
            .filter_map(|block| block.text.clone())
            .collect(),
        structured: outcome.structured_content,
    }
}

impl AppRuntime for McpRuntime {
    /// `--refresh` bypasses the cache for the first load only; later
    /// calls in the same process read it back.
    fn list_catalog(&mut self) -> Result<Vec<ToolDef>> {
        let force_refresh = std::mem::take(&mut self.force_refresh);
        self.load_catalog(force_refresh)
    }

    fn spawn_tool_call(
        &mut self,
        request_id: u64,
        name: &str,
        arguments: Map<String, Value>,
        tx: Sender<InternalEvent>,
    ) {
        let base_url = self.base_url.clone();
        let timeout = self.timeout;
        let name = name.to_owned();
        thread::spawn(move || {
            let outcome = (|| -> Result<ToolResult> {
                let token = load_token()?;
                let mut client = Client::new(&base_url, Some(&token.access_token), timeout)?;
                Ok(map_outcome(client.call_tool(&name, arguments)?))
            })()
            .map_err(|error| format!("{error:#}"));
            let _ = tx.send(InternalEvent::ToolFinished {
                request_id,
                outcome,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::map_outcome;
    use wisedeck_mcp::CallOutcome;

    #[test]
    fn outcome_mapping_keeps_text_blocks_and_structured_content() {
        let outcome: CallOutcome = serde_json::from_value(serde_json::json!({
            "isError": true,
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image"},
                {"type": "text", "text": "second"}
            ],
            "structuredContent": {"ok": false}
        }))
        .expect("outcome should decode");

        let result = map_outcome(outcome);
        assert!(result.is_error);
        assert_eq!(result.content, vec!["first".to_owned(), "second".to_owned()]);
        assert_eq!(
            result.structured,
            Some(serde_json::json!({"ok": false}))
        );
        assert_eq!(result.text(), "first\nsecond");
    }
}
