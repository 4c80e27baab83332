//! Configuration validation
//!
//! Validates configuration and reports issues.

use secrecy::ExposeSecret;

use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_token(config, result);
    result = validate_gateway_config(config, result);
    result = validate_rate_limit_config(config, result);
    result = validate_reconnect_config(config, result);

    if config.commands.prefix.trim().is_empty() {
        result = result.with_error(
            ValidationIssue::new("commands.prefix", "Command prefix must not be empty")
                .with_suggestion("Use a short marker such as \"!\""),
        );
    }

    result
}

fn validate_token(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let missing = config
        .token
        .as_ref()
        .map_or(true, |token| token.expose_secret().trim().is_empty());

    if missing {
        result = result.with_warning(
            ValidationIssue::new("token", "No bot token configured")
                .with_suggestion("Set DISCORD_TOKEN or pass credentials to Client::start"),
        );
    }

    result
}

fn validate_gateway_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if let Some(raw) = &config.gateway.url {
        match url::Url::parse(raw) {
            Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => {}
            Ok(parsed) => {
                result = result.with_error(ValidationIssue::new(
                    "gateway.url",
                    format!("Unsupported scheme '{}', expected ws or wss", parsed.scheme()),
                ));
            }
            Err(e) => {
                result = result.with_error(ValidationIssue::new(
                    "gateway.url",
                    format!("Invalid URL: {}", e),
                ));
            }
        }
    }

    if config.gateway.handshake_timeout.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "gateway.handshake_timeout",
            "Handshake timeout must be greater than zero",
        ));
    }

    if config.gateway.intents.is_empty() {
        result = result.with_warning(ValidationIssue::new(
            "gateway.intents",
            "No intents requested; the gateway will deliver almost no events",
        ));
    }

    let jitter = config.heartbeat.first_tick_jitter;
    if !(0.0..=1.0).contains(&jitter) {
        result = result.with_error(ValidationIssue::new(
            "heartbeat.first_tick_jitter",
            "Jitter must be a fraction between 0.0 and 1.0",
        ));
    }

    result
}

fn validate_rate_limit_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let limits = &config.rate_limit;

    if limits.capacity == 0 {
        result = result.with_error(ValidationIssue::new(
            "rate_limit.capacity",
            "Capacity must allow at least one send per window",
        ));
    }
    if limits.window.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "rate_limit.window",
            "Window must be greater than zero",
        ));
    }
    if limits.priority_reserve >= limits.capacity {
        result = result.with_error(
            ValidationIssue::new(
                "rate_limit.priority_reserve",
                "Reserve leaves no budget for presence updates",
            )
            .with_suggestion("Keep the reserve well below the capacity"),
        );
    }
    if limits.max_pending == 0 {
        result = result.with_error(ValidationIssue::new(
            "rate_limit.max_pending",
            "Queue must hold at least one command",
        ));
    }

    result
}

fn validate_reconnect_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let reconnect = &config.reconnect;

    if reconnect.multiplier < 1.0 {
        result = result.with_error(ValidationIssue::new(
            "reconnect.multiplier",
            "Multiplier below 1.0 would shrink delays",
        ));
    }
    if reconnect.initial_delay > reconnect.max_delay {
        result = result.with_error(ValidationIssue::new(
            "reconnect.initial_delay",
            "Initial delay exceeds the maximum delay",
        ));
    }
    if reconnect.max_attempts == Some(0) {
        result = result.with_warning(ValidationIssue::new(
            "reconnect.max_attempts",
            "Zero attempts means the first failure closes the client",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn with_token() -> Config {
        Config {
            token: Some(SecretString::from("token")),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let result = validate_config(&with_token());
        assert!(result.valid, "unexpected errors: {:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_token_is_warning() {
        let result = validate_config(&Config::default());
        assert!(result.valid);
        assert_eq!(result.warnings[0].path, "token");
    }

    #[test]
    fn test_reserve_must_fit_capacity() {
        let mut config = with_token();
        config.rate_limit.capacity = 2;
        config.rate_limit.priority_reserve = 2;
        let result = validate_config(&config);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.path == "rate_limit.priority_reserve"));
    }

    #[test]
    fn test_gateway_url_scheme() {
        let mut config = with_token();
        config.gateway.url = Some("https://gateway.discord.gg".to_string());
        let result = validate_config(&config);
        assert!(!result.valid);

        config.gateway.url = Some("wss://gateway.discord.gg".to_string());
        assert!(validate_config(&config).valid);
    }
}
