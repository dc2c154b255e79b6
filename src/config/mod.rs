use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod validator;

pub use validator::{ConfigValidator, ValidationError};

use crate::adapters::rate_limit::{RateLimitConfig, DEFAULT_SWEEP_PROBABILITY};
use crate::agents::config::{ProviderConfig, SessionConfig};
use crate::cli::Cli;

/// Prefix for environment overrides, e.g. `VENTRA__SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "VENTRA";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Limiter tiers; `api` guards all HTTP routes, `agent` guards each agent call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sweep_probability")]
    pub sweep_probability: f64,
    #[serde(default = "default_api_tier")]
    pub api: RateLimitConfig,
    #[serde(default = "default_agent_tier")]
    pub agent: RateLimitConfig,
    #[serde(default = "default_auth_tier")]
    pub auth: RateLimitConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_sweep_probability() -> f64 {
    DEFAULT_SWEEP_PROBABILITY
}

fn default_api_tier() -> RateLimitConfig {
    RateLimitConfig::API
}

fn default_agent_tier() -> RateLimitConfig {
    RateLimitConfig::AGENT
}

fn default_auth_tier() -> RateLimitConfig {
    RateLimitConfig::AUTH
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            sweep_probability: default_sweep_probability(),
            api: default_api_tier(),
            agent: default_agent_tier(),
            auth: default_auth_tier(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            rate_limit: RateLimitSettings::default(),
            provider: ProviderConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_root(".")
    }

    /// Create settings from CLI arguments (includes config file and CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let s = Self::load(cli.config.clone())?;

        let mut settings: Settings = s.try_deserialize()?;

        // CLI > env vars > config file
        settings.apply_cli_overrides(cli);

        settings.validate_or_err()?;
        Ok(settings)
    }

    /// Load `ventra.toml` (or `.yaml`, `.json`) from `root`
    pub fn from_root(root: &str) -> Result<Self, anyhow::Error> {
        let config_path = Path::new(root).join("ventra");
        let s = Self::load(config_path)?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate_or_err()?;
        Ok(settings)
    }

    fn load(config_path: PathBuf) -> Result<Config, anyhow::Error> {
        let config = Config::builder()
            .add_source(File::from(config_path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .build()?;
        Ok(config)
    }

    /// Apply CLI argument overrides to settings
    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
    }

    /// Every problem with these settings, not just the first
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        ConfigValidator::validate(self)
    }

    fn validate_or_err(&self) -> Result<(), anyhow::Error> {
        self.validate().map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!("Configuration validation failed:\n{}", error_messages.join("\n"))
        })
    }
}
