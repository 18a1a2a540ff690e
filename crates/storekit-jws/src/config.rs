//! Credential issuer configuration.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for App Store Server API requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENV_ISSUER_ID: &str = "STOREKIT_ISSUER_ID";
pub const ENV_KEY_ID: &str = "STOREKIT_KEY_ID";
pub const ENV_BUNDLE_ID: &str = "STOREKIT_BUNDLE_ID";
pub const ENV_PRIVATE_KEY: &str = "STOREKIT_PRIVATE_KEY";
pub const ENV_PRIVATE_KEY_PATH: &str = "STOREKIT_PRIVATE_KEY_PATH";
pub const ENV_REQUEST_TIMEOUT_SECONDS: &str = "STOREKIT_REQUEST_TIMEOUT_SECONDS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    #[error("Failed to read private key file: {0}")]
    KeyFile(String),
}

/// Identity and key material for signing App Store Server API credentials.
///
/// `request_timeout` is not used for signing; it is carried for the HTTP
/// client that sends the credential.
#[derive(Clone)]
pub struct IssuerConfig {
    /// Issuer ID from App Store Connect.
    pub issuer_id: String,
    /// Private key ID from App Store Connect.
    pub key_id: String,
    /// App bundle ID, sent as `bid`.
    pub bundle_id: String,
    /// PKCS#8 PEM EC P-256 private key.
    pub private_key: SecretString,
    pub request_timeout: Duration,
    /// Optional `x5c` (standard base64 DER, leaf first) added to the header.
    pub certificate_chain: Option<Vec<String>>,
}

// Custom Debug to redact the private key
impl std::fmt::Debug for IssuerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerConfig")
            .field("issuer_id", &self.issuer_id)
            .field("key_id", &self.key_id)
            .field("bundle_id", &self.bundle_id)
            .field("private_key", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .field(
                "certificate_chain",
                &self.certificate_chain.as_ref().map(Vec::len),
            )
            .finish()
    }
}

impl IssuerConfig {
    pub fn new(
        issuer_id: impl Into<String>,
        key_id: impl Into<String>,
        bundle_id: impl Into<String>,
        private_key: SecretString,
    ) -> Self {
        Self {
            issuer_id: issuer_id.into(),
            key_id: key_id.into(),
            bundle_id: bundle_id.into(),
            private_key,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            certificate_chain: None,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_certificate_chain(mut self, x5c: Vec<String>) -> Self {
        self.certificate_chain = Some(x5c);
        self
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// See [`IssuerConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    ///
    /// The key comes from `STOREKIT_PRIVATE_KEY` when set, otherwise from the
    /// file named by `STOREKIT_PRIVATE_KEY_PATH`. The key itself is validated
    /// when the issuer is built.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for missing variables, an unreadable key file or
    /// an unparsable timeout.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer_id = required(vars, ENV_ISSUER_ID)?;
        let key_id = required(vars, ENV_KEY_ID)?;
        let bundle_id = required(vars, ENV_BUNDLE_ID)?;

        let private_key = match (vars.get(ENV_PRIVATE_KEY), vars.get(ENV_PRIVATE_KEY_PATH)) {
            (Some(pem), _) => SecretString::from(pem.clone()),
            (None, Some(path)) => {
                let pem = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::KeyFile(format!("{path}: {e}")))?;
                SecretString::from(pem)
            }
            (None, None) => return Err(ConfigError::MissingEnvVar(ENV_PRIVATE_KEY.to_string())),
        };

        let request_timeout = match vars.get(ENV_REQUEST_TIMEOUT_SECONDS) {
            Some(value) => {
                let secs: u64 = value.parse().map_err(|e| ConfigError::InvalidValue {
                    var: ENV_REQUEST_TIMEOUT_SECONDS.to_string(),
                    reason: format!("{e}"),
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_REQUEST_TIMEOUT_SECONDS.to_string(),
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self::new(issuer_id, key_id, bundle_id, private_key).with_request_timeout(request_timeout))
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}
