//! Secret store interface consumed by the rotation steps.
//!
//! The store is the only place rotation state lives. Its conditional put
//! (keyed by the version token) and its atomic stage move are the only
//! synchronisation primitives the handler relies on.

pub mod secrets_manager;

pub use secrets_manager::SecretsManagerStore;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use common::{RotationError, Stage};

/// Result of `describe` for one secret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretMetadata {
    /// `None` when the store does not report the flag.
    pub rotation_enabled: Option<bool>,
    /// Version id to the stage labels attached to it.
    pub versions: BTreeMap<String, BTreeSet<String>>,
    /// Resource tags, including `aws:`-prefixed system tags.
    pub tags: Vec<(String, String)>,
}

impl SecretMetadata {
    /// Stage labels attached to `version_id`, if the version is known.
    pub fn stages_of(&self, version_id: &str) -> Option<&BTreeSet<String>> {
        self.versions.get(version_id)
    }

    /// The version currently carrying `stage`.
    pub fn version_with(&self, stage: Stage) -> Option<&str> {
        self.versions
            .iter()
            .find(|(_, stages)| stages.contains(stage.as_str()))
            .map(|(id, _)| id.as_str())
    }
}

/// One stored version of a secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    pub version_id: String,
    pub secret_string: String,
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretValue")
            .field("version_id", &self.version_id)
            .field("secret_string", &"[REDACTED]")
            .finish()
    }
}

/// Outcome of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The version was written (or an identical write had already landed).
    Created,
    /// A version with this token already exists with different content.
    AlreadyExists,
}

/// Constraints passed to the store's password generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub length: u32,
    pub exclude_characters: String,
    pub require_each_type: bool,
}

/// Operations the rotation steps need from the secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn describe(&self, secret_id: &str) -> Result<SecretMetadata, RotationError>;

    /// Fetch the version carrying `stage`. With `version_id`, the version must
    /// also match it. Returns `Ok(None)` when no such version exists.
    async fn get_value(
        &self,
        secret_id: &str,
        stage: Stage,
        version_id: Option<&str>,
    ) -> Result<Option<SecretValue>, RotationError>;

    /// Create version `version_id` labelled `AWSPENDING`.
    async fn put_pending(
        &self,
        secret_id: &str,
        version_id: &str,
        secret_string: &str,
    ) -> Result<PutOutcome, RotationError>;

    /// Atomically move `stage` to `move_to`, removing it from `remove_from`.
    async fn update_stage(
        &self,
        secret_id: &str,
        stage: Stage,
        move_to: &str,
        remove_from: Option<&str>,
    ) -> Result<(), RotationError>;

    async fn random_password(&self, policy: &PasswordPolicy) -> Result<String, RotationError>;
}
