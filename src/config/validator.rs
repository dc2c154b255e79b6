use thiserror::Error;

use crate::adapters::rate_limit::RateLimitConfig;
use crate::config::{RateLimitSettings, ServerSettings, Settings};
use crate::agents::config::{ProviderConfig, SessionConfig};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        Self::validate_server(&settings.server, &mut errors);
        Self::validate_rate_limit(&settings.rate_limit, &mut errors);
        Self::validate_provider(&settings.provider, &mut errors);
        Self::validate_sessions(&settings.sessions, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings, errors: &mut Vec<ValidationError>) {
        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::invalid("server.port", "Port must be greater than 0"));
        }
    }

    fn validate_rate_limit(rate_limit: &RateLimitSettings, errors: &mut Vec<ValidationError>) {
        if !(0.0..=1.0).contains(&rate_limit.sweep_probability) {
            errors.push(ValidationError::invalid(
                "rate_limit.sweep_probability",
                "Probability must be between 0 and 1",
            ));
        }

        for (name, tier) in [
            ("rate_limit.api", &rate_limit.api),
            ("rate_limit.agent", &rate_limit.agent),
            ("rate_limit.auth", &rate_limit.auth),
        ] {
            Self::validate_tier(name, tier, errors);
        }
    }

    fn validate_tier(name: &str, tier: &RateLimitConfig, errors: &mut Vec<ValidationError>) {
        if tier.max_requests == 0 {
            errors.push(ValidationError::invalid(
                &format!("{}.max_requests", name),
                "Quota must be greater than 0",
            ));
        }
        if tier.window_ms == 0 {
            errors.push(ValidationError::invalid(
                &format!("{}.window_ms", name),
                "Window must be greater than 0",
            ));
        }
    }

    fn validate_provider(provider: &ProviderConfig, errors: &mut Vec<ValidationError>) {
        if provider.base_url.is_empty() {
            errors.push(ValidationError::MissingField("provider.base_url".to_string()));
        } else if !(provider.base_url.starts_with("http://") || provider.base_url.starts_with("https://")) {
            errors.push(ValidationError::invalid(
                "provider.base_url",
                "URL must start with http:// or https://",
            ));
        }

        if provider.timeout_seconds == 0 {
            errors.push(ValidationError::invalid(
                "provider.timeout_seconds",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_sessions(sessions: &SessionConfig, errors: &mut Vec<ValidationError>) {
        if sessions.history_limit == 0 {
            errors.push(ValidationError::invalid(
                "sessions.history_limit",
                "History limit must be at least 1",
            ));
        }

        if sessions.max_retained_turns < sessions.history_limit {
            errors.push(ValidationError::invalid(
                "sessions.max_retained_turns",
                "Retention must be at least the history limit",
            ));
        } else if sessions.max_retained_turns < 2 {
            errors.push(ValidationError::invalid(
                "sessions.max_retained_turns",
                "Retention must hold at least one exchange",
            ));
        }

        if sessions.max_sessions == 0 {
            errors.push(ValidationError::invalid(
                "sessions.max_sessions",
                "Session cap must be at least 1",
            ));
        }

        if sessions.default_mode.trim().is_empty() {
            errors.push(ValidationError::MissingField("sessions.default_mode".to_string()));
        }

        if sessions.default_agent_type.trim().is_empty() {
            errors.push(ValidationError::MissingField("sessions.default_agent_type".to_string()));
        }
    }
}
