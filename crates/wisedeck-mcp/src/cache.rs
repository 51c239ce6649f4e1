// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use wisedeck_app::ToolDef;

pub const APP_NAME: &str = "wisedeck";

/// On-disk catalog snapshot: `{ tools, fetched_at }` with `fetched_at`
/// in milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCache {
    pub tools: Vec<ToolDef>,
    pub fetched_at: i64,
}

pub fn cache_dir() -> Result<PathBuf> {
    if let Some(override_dir) = env::var_os("WISEDECK_CACHE_DIR") {
        return Ok(PathBuf::from(override_dir));
    }
    let cache_root = dirs::cache_dir().ok_or_else(|| {
        anyhow!("cannot resolve cache directory; set WISEDECK_CACHE_DIR to a writable directory")
    })?;
    Ok(cache_root.join(APP_NAME))
}

/// One cache file per endpoint so pointing at a staging server never
/// serves the production catalog.
pub fn cache_path(dir: &Path, endpoint: &str) -> PathBuf {
    let key: String = endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("catalog-{key}.json"))
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// A fresh cached catalog, or None when the file is missing, unreadable,
/// corrupt, or older than the TTL. Bad caches are never an error; the
/// caller refetches and rewrites.
pub fn load(path: &Path, ttl_hours: i64) -> Option<Vec<ToolDef>> {
    let raw = fs::read_to_string(path).ok()?;
    let cache: CatalogCache = serde_json::from_str(&raw).ok()?;
    let age_ms = now_millis().saturating_sub(cache.fetched_at);
    if age_ms < 0 || age_ms > ttl_hours.saturating_mul(60 * 60 * 1000) {
        return None;
    }
    Some(cache.tools)
}

pub fn store(path: &Path, tools: &[ToolDef]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create cache directory {}", parent.display()))?;
    }
    let cache = CatalogCache {
        tools: tools.to_vec(),
        fetched_at: now_millis(),
    };
    let raw = serde_json::to_string(&cache).context("encode catalog cache")?;
    fs::write(path, raw).with_context(|| format!("write catalog cache {}", path.display()))
}
