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

    /// Turn the first error into a config error
    pub fn into_result(self) -> crate::error::Result<Vec<ValidationIssue>> {
        match self.errors.into_iter().next() {
            Some(issue) => Err(crate::error::Error::Config(format!(
                "{}: {}",
                issue.path, issue.message
            ))),
            None => Ok(self.warnings),
        }
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

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_gateway_config(config, result);
    result = validate_chat_config(config, result);

    result
}

fn validate_gateway_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let gateway = &config.gateway;

    match url::Url::parse(&gateway.url) {
        Ok(url) if url.scheme() == "ws" || url.scheme() == "wss" => {}
        Ok(url) => {
            result = result.with_error(
                ValidationIssue::new(
                    "gateway.url",
                    format!("Unsupported scheme '{}'", url.scheme()),
                )
                .with_suggestion("Use a ws:// or wss:// endpoint"),
            );
        }
        Err(e) => {
            result = result.with_error(
                ValidationIssue::new("gateway.url", format!("Invalid URL: {}", e))
                    .with_suggestion("Set OPENAGENT_GATEWAY_URL, e.g. ws://127.0.0.1:18789"),
            );
        }
    }

    if gateway.reconnect_delay.is_zero() {
        result = result.with_error(
            ValidationIssue::new("gateway.reconnect_delay", "Reconnect delay must be greater than zero")
                .with_suggestion("Use a delay such as \"800ms\""),
        );
    }

    if gateway.min_protocol > gateway.max_protocol {
        result = result.with_error(ValidationIssue::new(
            "gateway.min_protocol",
            format!(
                "min_protocol ({}) is greater than max_protocol ({})",
                gateway.min_protocol, gateway.max_protocol
            ),
        ));
    }

    let has_token = gateway
        .token
        .as_ref()
        .map_or(false, |t| !t.expose_secret().is_empty());
    let has_password = gateway
        .password
        .as_ref()
        .map_or(false, |p| !p.expose_secret().is_empty());
    if !has_token && !has_password {
        result = result.with_warning(
            ValidationIssue::new(
                "gateway.token",
                "No gateway credential configured. Only unauthenticated gateways will accept the handshake.",
            )
            .with_suggestion("Set OPENAGENT_GATEWAY_TOKEN or OPENAGENT_GATEWAY_PASSWORD"),
        );
    }

    result
}

fn validate_chat_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.chat.session_key.trim().is_empty() {
        result = result.with_error(
            ValidationIssue::new("chat.session_key", "Session key must not be empty")
                .with_suggestion("Use \"main\" or an agent-scoped key"),
        );
    }

    if config.chat.history_limit == 0 {
        result = result.with_warning(ValidationIssue::new(
            "chat.history_limit",
            "History limit is 0; chat.history will return nothing",
        ));
    }

    result
}
