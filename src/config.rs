//! Runtime configuration loaded from the environment (and `.env` via dotenvy).

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_SECRET_KEY: &str = "change-me-in-production";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Server settings. Every field has a default so a bare `cargo run` works.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub secret_key: String,
    pub token_ttl_minutes: i64,
    pub bcrypt_cost: u32,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub generation_timeout: Duration,
    /// Allowed CORS origins; `["*"]` allows any origin.
    pub cors_origins: Vec<String>,
    pub seed_identities: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8000,
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            token_ttl_minutes: 30,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-3.5-turbo".to_string(),
            generation_timeout: Duration::from_secs(60),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
                "http://localhost:8000".to_string(),
            ],
            seed_identities: true,
        }
    }
}

impl Config {
    /// Read configuration from process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary lookup so tests don't have to mutate process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();

        if let Some(v) = lookup("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Some(v) = lookup("PORT") {
            cfg.port = parse_num("PORT", v)?;
        }
        if let Some(v) = lookup("SECRET_KEY") {
            cfg.secret_key = v;
        }
        if let Some(v) = lookup("TOKEN_TTL_MINUTES") {
            cfg.token_ttl_minutes = parse_num("TOKEN_TTL_MINUTES", v)?;
        }
        if let Some(v) = lookup("BCRYPT_COST") {
            cfg.bcrypt_cost = parse_num("BCRYPT_COST", v)?;
        }
        cfg.openai_api_key = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            cfg.openai_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            cfg.openai_model = v;
        }
        if let Some(v) = lookup("GENERATION_TIMEOUT_SECS") {
            cfg.generation_timeout = Duration::from_secs(parse_num("GENERATION_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            cfg.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("SEED_IDENTITIES") {
            cfg.seed_identities = parse_bool("SEED_IDENTITIES", v)?;
        }

        if cfg.secret_key == DEFAULT_SECRET_KEY {
            tracing::warn!("SECRET_KEY not set; using the built-in development key");
        }
        Ok(cfg)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.bind_addr, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidValue { name: "BIND_ADDR", value: raw })
    }
}

fn parse_num<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue { name, value })
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name, value }),
    }
}
