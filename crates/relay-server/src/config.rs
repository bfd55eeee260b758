use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;

use relay_api::{ChatConfig, SessionReuse};
use relay_genai::GenerationConfig;
use relay_genai::config::{DEFAULT_BASE_URL, DEFAULT_MODEL};

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Process configuration, read once at startup.
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub generation: GenerationConfig,
    pub chat: ChatConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset and empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var(API_KEY_VAR).ok_or_else(|| anyhow!("{} is not set", API_KEY_VAR))?;

        let port: u16 = var("RELAY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("RELAY_PORT must be a port number")?;

        let history_limit: u32 = var("RELAY_HISTORY_LIMIT")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("RELAY_HISTORY_LIMIT must be a non-negative integer")?
            .unwrap_or(10);

        let session_reuse: SessionReuse = var("RELAY_SESSION_REUSE")
            .map(|v| v.parse::<SessionReuse>())
            .transpose()
            .map_err(|e: String| anyhow!(e))?
            .unwrap_or(SessionReuse::ReuseLatest);

        let generation = GenerationConfig::new(SecretString::from(api_key))
            .with_model(var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()))
            .with_base_url(var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()));

        Ok(Self {
            host: var("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("RELAY_DB_PATH").unwrap_or_else(|| "relay.db".into()).into(),
            generation,
            chat: ChatConfig {
                history_limit,
                session_reuse,
            },
        })
    }
}
