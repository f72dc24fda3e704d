use crate::error::{BridgeError, Result};
use std::collections::HashMap;
use std::env;
use std::fmt;
use url::Url;

/// Options understood by the bridge. Anything else in a settings map is
/// reported (when a logger is configured) and otherwise ignored.
pub const RECOGNIZED_OPTIONS: [&str; 16] = [
    "access_key_id",
    "allow_fallback_secret",
    "callback_url",
    "convert_params",
    "endpoint",
    "log_formatter",
    "log_level",
    "logger",
    "max_payload_bytes",
    "profile",
    "region",
    "retry_limit",
    "secret_access_key",
    "session_token",
    "stub_responses",
    "validate_params",
];

/// Payload ceiling applied when `validate_params` is on. A local policy,
/// kept below what Lambda itself accepts for `Event` invocations.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Prefix of the environment variables read by [`LambdaConfig::from_env`].
const ENV_PREFIX: &str = "LAMBDA_";

/// Output format of the tracing subscriber installed by the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "full" | "default" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            other => Err(BridgeError::Configuration(format!(
                "Unknown log formatter '{}' (expected full, compact or pretty)",
                other
            ))),
        }
    }
}

/// Immutable configuration shared by the dispatcher, the authenticator and
/// the Lambda client setup.
#[derive(Clone)]
pub struct LambdaConfig {
    /// URL the Lambda function calls back with its result (required)
    pub callback_url: String,

    /// Static AWS credentials; the default provider chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,

    pub region: Option<String>,

    /// Custom Lambda endpoint (e.g. a local emulator)
    pub endpoint: Option<String>,

    /// Named profile from the shared AWS config files
    pub profile: Option<String>,

    /// Retries after the first attempt, handed to the SDK retry policy
    pub retry_limit: Option<u32>,

    /// Use the in-memory stub client instead of calling AWS (default: false)
    pub stub_responses: bool,

    pub log_level: Option<String>,

    /// Enables reporting of unsupported options when set
    pub logger: Option<String>,

    pub log_formatter: LogFormat,

    /// Check the invocation payload size before it leaves the process (default: true)
    pub validate_params: bool,

    /// Largest payload sent when `validate_params` is on
    /// (default: [`DEFAULT_MAX_PAYLOAD_BYTES`])
    pub max_payload_bytes: usize,

    /// Accepted for compatibility; the Rust SDK builders are strongly typed (default: true)
    pub convert_params: bool,

    /// Accept callbacks for attachments whose stored secret is missing by
    /// signing with a fixed placeholder instead (default: false)
    pub allow_fallback_secret: bool,
}

impl fmt::Debug for LambdaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("LambdaConfig")
            .field("callback_url", &self.callback_url)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redacted(&self.secret_access_key))
            .field("session_token", &redacted(&self.session_token))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("profile", &self.profile)
            .field("retry_limit", &self.retry_limit)
            .field("stub_responses", &self.stub_responses)
            .field("log_level", &self.log_level)
            .field("logger", &self.logger)
            .field("log_formatter", &self.log_formatter)
            .field("validate_params", &self.validate_params)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("convert_params", &self.convert_params)
            .field("allow_fallback_secret", &self.allow_fallback_secret)
            .finish()
    }
}

impl LambdaConfig {
    /// Minimal configuration: only the callback URL, everything else default.
    pub fn new(callback_url: impl Into<String>) -> Result<Self> {
        let mut settings = HashMap::new();
        settings.insert("callback_url".to_string(), callback_url.into());
        Self::from_settings(settings)
    }

    /// Build the configuration from a flat settings map.
    ///
    /// Fails with [`BridgeError::Configuration`] when `callback_url` is
    /// missing or malformed, or when a typed option does not parse. Unknown
    /// keys never fail.
    pub fn from_settings(mut settings: HashMap<String, String>) -> Result<Self> {
        let callback_url = settings
            .remove("callback_url")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                BridgeError::Configuration(
                    "The callback_url option is required for the Lambda bridge".to_string(),
                )
            })?;
        Url::parse(&callback_url).map_err(|e| {
            BridgeError::Configuration(format!("Invalid callback_url '{}': {}", callback_url, e))
        })?;

        let retry_limit = match settings.remove("retry_limit") {
            Some(v) => Some(v.trim().parse().map_err(|_| {
                BridgeError::Configuration(format!("Invalid retry_limit '{}'", v))
            })?),
            None => None,
        };

        let max_payload_bytes = match settings.remove("max_payload_bytes") {
            Some(v) => v.trim().parse().map_err(|_| {
                BridgeError::Configuration(format!("Invalid max_payload_bytes '{}'", v))
            })?,
            None => DEFAULT_MAX_PAYLOAD_BYTES,
        };

        let log_formatter = match settings.remove("log_formatter") {
            Some(v) => LogFormat::parse(&v)?,
            None => LogFormat::default(),
        };

        let config = Self {
            callback_url,
            access_key_id: settings.remove("access_key_id"),
            secret_access_key: settings.remove("secret_access_key"),
            session_token: settings.remove("session_token"),
            region: settings.remove("region"),
            endpoint: settings.remove("endpoint"),
            profile: settings.remove("profile"),
            retry_limit,
            stub_responses: settings
                .remove("stub_responses")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            log_level: settings.remove("log_level"),
            logger: settings.remove("logger").filter(|v| !v.is_empty()),
            log_formatter,
            validate_params: settings
                .remove("validate_params")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            max_payload_bytes,
            convert_params: settings
                .remove("convert_params")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            allow_fallback_secret: settings
                .remove("allow_fallback_secret")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        };

        if config.logger_enabled() {
            let mut unknown: Vec<_> = settings.keys().collect();
            unknown.sort();
            for key in unknown {
                tracing::info!("The '{}' option is not supported by the Lambda bridge", key);
            }
        }

        Ok(config)
    }

    /// Load configuration from `LAMBDA_*` environment variables
    /// (`LAMBDA_CALLBACK_URL`, `LAMBDA_REGION`, ...).
    pub fn from_env() -> Result<Self> {
        let settings = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|option| (option.to_lowercase(), value))
            })
            .collect();
        Self::from_settings(settings)
    }

    /// Whether a logger has been configured (anything but `none`/`false`).
    pub fn logger_enabled(&self) -> bool {
        self.logger
            .as_deref()
            .map(|v| !matches!(v.to_lowercase().as_str(), "none" | "false" | "0" | "off"))
            .unwrap_or(false)
    }

    /// Default `EnvFilter` directive derived from `log_level`.
    pub fn log_filter(&self) -> String {
        let level = self.log_level.as_deref().unwrap_or("info");
        format!("file_lambda_bridge={},tower_http=info", level)
    }

    /// Returns a copy with the fallback secret opt-in toggled.
    pub fn with_fallback_secret(mut self, allow: bool) -> Self {
        self.allow_fallback_secret = allow;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_callback_url_fails() {
        let err = LambdaConfig::from_settings(settings(&[("access_key_id", "AKID")])).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(err.to_string().contains("callback_url"));
    }

    #[test]
    fn test_blank_callback_url_fails() {
        let err = LambdaConfig::from_settings(settings(&[("callback_url", "  ")])).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_invalid_callback_url_fails() {
        let err = LambdaConfig::new("not a url").unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_defaults() {
        let config = LambdaConfig::new("https://app.example.com/lambda/callback").unwrap();
        assert_eq!(config.callback_url, "https://app.example.com/lambda/callback");
        assert!(config.validate_params);
        assert_eq!(config.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
        assert!(config.convert_params);
        assert!(!config.stub_responses);
        assert!(!config.allow_fallback_secret);
        assert!(!config.logger_enabled());
        assert_eq!(config.log_formatter, LogFormat::Full);
        assert_eq!(config.log_filter(), "file_lambda_bridge=info,tower_http=info");
    }

    #[test]
    fn test_recognized_options_are_applied() {
        let config = LambdaConfig::from_settings(settings(&[
            ("callback_url", "https://app.example.com/cb"),
            ("access_key_id", "AKID"),
            ("secret_access_key", "SECRET"),
            ("session_token", "TOKEN"),
            ("region", "eu-west-1"),
            ("endpoint", "http://localhost:9001"),
            ("profile", "media"),
            ("retry_limit", "3"),
            ("stub_responses", "true"),
            ("log_level", "debug"),
            ("logger", "tracing"),
            ("log_formatter", "compact"),
            ("validate_params", "false"),
            ("max_payload_bytes", "1048576"),
            ("convert_params", "0"),
            ("allow_fallback_secret", "1"),
        ]))
        .unwrap();

        assert_eq!(config.access_key_id.as_deref(), Some("AKID"));
        assert_eq!(config.secret_access_key.as_deref(), Some("SECRET"));
        assert_eq!(config.session_token.as_deref(), Some("TOKEN"));
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9001"));
        assert_eq!(config.profile.as_deref(), Some("media"));
        assert_eq!(config.retry_limit, Some(3));
        assert!(config.stub_responses);
        assert!(config.logger_enabled());
        assert_eq!(config.log_formatter, LogFormat::Compact);
        assert!(!config.validate_params);
        assert_eq!(config.max_payload_bytes, 1024 * 1024);
        assert!(!config.convert_params);
        assert!(config.allow_fallback_secret);
        assert_eq!(config.log_filter(), "file_lambda_bridge=debug,tower_http=info");
    }

    #[test]
    fn test_unknown_options_are_not_rejected() {
        let with_logger = LambdaConfig::from_settings(settings(&[
            ("callback_url", "https://app.example.com/cb"),
            ("logger", "tracing"),
            ("unknown_key", "some value"),
        ]));
        assert!(with_logger.is_ok());

        let without_logger = LambdaConfig::from_settings(settings(&[
            ("callback_url", "https://app.example.com/cb"),
            ("unknown_key", "some value"),
        ]));
        assert!(without_logger.is_ok());
    }

    #[test]
    fn test_invalid_retry_limit_fails() {
        let err = LambdaConfig::from_settings(settings(&[
            ("callback_url", "https://app.example.com/cb"),
            ("retry_limit", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_invalid_max_payload_bytes_fails() {
        let err = LambdaConfig::from_settings(settings(&[
            ("callback_url", "https://app.example.com/cb"),
            ("max_payload_bytes", "1MB"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = LambdaConfig::from_settings(settings(&[
            ("callback_url", "https://app.example.com/cb"),
            ("secret_access_key", "super-secret"),
            ("session_token", "session-secret"),
        ]))
        .unwrap();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("session-secret"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_env() {
        unsafe { env::set_var("LAMBDA_CALLBACK_URL", "https://env.example.com/cb") };
        unsafe { env::set_var("LAMBDA_REGION", "ap-southeast-1") };
        let config = LambdaConfig::from_env();
        unsafe { env::remove_var("LAMBDA_CALLBACK_URL") };
        unsafe { env::remove_var("LAMBDA_REGION") };

        let config = config.unwrap();
        assert_eq!(config.callback_url, "https://env.example.com/cb");
        assert_eq!(config.region.as_deref(), Some("ap-southeast-1"));
    }
}
