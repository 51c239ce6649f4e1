// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::APP_NAME;

pub const TOKEN_ENV: &str = "WISEDECK_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    OAuth,
    Token,
}

impl AuthType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OAuth => "oauth",
            Self::Token => "token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub auth_type: AuthType,
}

/// Saved by the browser sign-in flow, which lives outside this crate.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    access_token: String,
    #[serde(default)]
    auth_type: Option<String>,
}

pub fn credentials_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("WISEDECK_CREDENTIALS_PATH") {
        return Ok(PathBuf::from(override_path));
    }
    let config_root = dirs::config_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "cannot resolve config directory; set WISEDECK_CREDENTIALS_PATH to the credentials file"
        )
    })?;
    Ok(config_root.join(APP_NAME).join("credentials.json"))
}

/// Resolution order: `WISEDECK_TOKEN`, then the persisted credentials
/// file. Called immediately before every invocation so a token refreshed
/// by another process is picked up.
pub fn load_token() -> Result<Token> {
    load_token_from(&credentials_path()?)
}

pub fn load_token_from(credentials: &Path) -> Result<Token> {
    if let Ok(raw) = env::var(TOKEN_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Ok(Token {
                access_token: trimmed.to_owned(),
                auth_type: AuthType::Token,
            });
        }
    }

    if credentials.exists() {
        let raw = fs::read_to_string(credentials)
            .with_context(|| format!("read credentials file {}", credentials.display()))?;
        let file: CredentialsFile = serde_json::from_str(&raw)
            .with_context(|| format!("decode credentials file {}", credentials.display()))?;
        if file.access_token.trim().is_empty() {
            bail!(
                "credentials file {} holds an empty access token; sign in again",
                credentials.display()
            );
        }
        let auth_type = match file.auth_type.as_deref() {
            Some("token") => AuthType::Token,
            _ => AuthType::OAuth,
        };
        return Ok(Token {
            access_token: file.access_token,
            auth_type,
        });
    }

    bail!(
        "no access token found; set {TOKEN_ENV} or sign in to create {}",
        credentials.display()
    )
}
