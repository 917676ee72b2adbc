//! Configuration loading and validation for the rotation handler.
//!
//! All values are read from environment variables once per process, before the
//! first invocation. The process exits with a clear error message if any
//! required variable is missing or invalid.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::rotation::username::UsernameSuffix;
use crate::rotation::RetirePolicy;

/// Validated rotation handler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Endpoint override for the Secrets Manager client (e.g. a VPC endpoint).
    #[serde(default)]
    pub secrets_manager_endpoint: Option<String>,

    /// Timeout applied to every database connection attempt.
    #[serde(default = "default_db_connect_timeout")]
    pub db_connect_timeout_secs: u64,

    /// Length of generated passwords.
    #[serde(default = "default_password_length")]
    pub password_length: u32,

    /// Characters the password generator must never emit.
    #[serde(default = "default_password_exclude_characters")]
    pub password_exclude_characters: String,

    /// How new usernames are derived from the current one.
    #[serde(default)]
    pub username_suffix: UsernameSuffix,

    /// What happens to the outgoing principal in `finishSecret`. **Required.**
    pub retire_policy: RetirePolicy,

    /// Grant membership of the current principal to the pending one.
    #[serde(default = "default_inherit_privileges")]
    pub inherit_privileges: bool,

    /// Schema whose table privileges are revoked from the outgoing principal.
    #[serde(default = "default_revoke_schema")]
    pub revoke_schema: String,

    /// Also re-verify the `AWSCURRENT` credentials during `testSecret`.
    #[serde(default)]
    pub test_current_credentials: bool,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint for span export. Spans are only logged when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

fn default_db_connect_timeout() -> u64 {
    5
}
fn default_password_length() -> u32 {
    16
}
fn default_password_exclude_characters() -> String {
    r#"/@"'\"#.into()
}
fn default_inherit_privileges() -> bool {
    true
}
fn default_revoke_schema() -> String {
    "public".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration (is RETIRE_POLICY set?)")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.secrets_manager_endpoint {
            ensure_non_empty(endpoint, "SECRETS_MANAGER_ENDPOINT")?;
        }
        if !(1..=30).contains(&self.db_connect_timeout_secs) {
            anyhow::bail!("DB_CONNECT_TIMEOUT_SECS must be between 1 and 30");
        }
        if !(8..=4096).contains(&self.password_length) {
            anyhow::bail!("PASSWORD_LENGTH must be between 8 and 4096");
        }
        ensure_non_empty(&self.revoke_schema, "REVOKE_SCHEMA")?;
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} must not be empty when set");
    }
    Ok(())
}
