//! Secrets Manager rotation driver.
//!
//! # Protocol
//!
//! Secrets Manager invokes the handler once per step, in order, and may retry
//! any step:
//!
//! ```text
//! NEW ──create──► PENDING_CREATED ──set──► PENDING_SET ──test──► PENDING_TESTED ──finish──► CURRENT
//! ```
//!
//! The driver does not track which state a rotation is in. Each step
//! re-derives what it needs from the secret store and tolerates running twice
//! with the same token, or concurrently with a retry of itself.

mod create_secret;
mod finish_secret;
mod set_secret;
mod test_secret;
pub mod username;

use std::sync::Arc;
use std::time::Duration;

use common::{RotationError, RotationEvent, Stage, Step, StepOutcome};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::aws::DbEndpointLookup;
use crate::config::Config;
use crate::db::{Database, DbSession};
use crate::secret::{DbCredential, SecretPayload, SecretResolver};
use crate::store::{PasswordPolicy, SecretStore};
use username::UsernameSuffix;

/// What `finishSecret` does to the outgoing principal once its table
/// privileges are revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetirePolicy {
    /// Leave the principal in place with its login intact.
    RevokeOnly,
    /// Keep the principal for audit but forbid logins.
    DisableLogin,
    /// Drop the principal.
    Drop,
}

/// Per-process rotation behaviour, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub connect_timeout: Duration,
    pub password: PasswordPolicy,
    pub username_suffix: UsernameSuffix,
    pub retire_policy: RetirePolicy,
    pub inherit_privileges: bool,
    pub revoke_schema: String,
    pub test_current_credentials: bool,
}

impl From<&Config> for RotationSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            password: PasswordPolicy {
                length: cfg.password_length,
                exclude_characters: cfg.password_exclude_characters.clone(),
                require_each_type: true,
            },
            username_suffix: cfg.username_suffix,
            retire_policy: cfg.retire_policy,
            inherit_privileges: cfg.inherit_privileges,
            revoke_schema: cfg.revoke_schema.clone(),
            test_current_credentials: cfg.test_current_credentials,
        }
    }
}

/// Everything a step needs, constructed once per process.
pub struct Rotator {
    store: Arc<dyn SecretStore>,
    db: Arc<dyn Database>,
    rds: Arc<dyn DbEndpointLookup>,
    settings: RotationSettings,
}

impl Rotator {
    pub fn new(
        store: Arc<dyn SecretStore>,
        db: Arc<dyn Database>,
        rds: Arc<dyn DbEndpointLookup>,
        settings: RotationSettings,
    ) -> Self {
        Self {
            store,
            db,
            rds,
            settings,
        }
    }

    /// Validate version staging for `event` and run the requested step.
    ///
    /// A token that is already `AWSCURRENT` is an idempotent replay and
    /// succeeds without running any step.
    #[instrument(
        name = "rotation_step",
        skip_all,
        fields(
            secret_id = %event.secret_id,
            step = %event.step,
            token = %event.client_request_token,
        )
    )]
    pub async fn handle(&self, event: &RotationEvent) -> Result<StepOutcome, RotationError> {
        self.dispatch(event)
            .await
            .inspect(|outcome| info!(?outcome, "rotation step complete"))
            .inspect_err(|e| error!(code = e.code(), error = %e, "rotation step failed"))
    }

    async fn dispatch(&self, event: &RotationEvent) -> Result<StepOutcome, RotationError> {
        let secret_id = event.secret_id.as_str();
        let token = event.client_request_token.as_str();

        let meta = self.store.describe(secret_id).await?;
        if meta.rotation_enabled == Some(false) {
            return Err(RotationError::NotEnabledForRotation(secret_id.to_owned()));
        }

        let stages = meta.stages_of(token).ok_or_else(|| {
            RotationError::UnknownVersionOrStage(format!(
                "secret version {token} has no stage for rotation of secret {secret_id}"
            ))
        })?;
        if stages.contains(Stage::Current.as_str()) {
            info!("secret version already set as AWSCURRENT");
            return Ok(StepOutcome::AlreadyDone);
        }
        if !stages.contains(Stage::Pending.as_str()) {
            return Err(RotationError::UnknownVersionOrStage(format!(
                "secret version {token} not set as AWSPENDING for rotation of secret {secret_id}"
            )));
        }

        match event.step.parse::<Step>()? {
            Step::Create => self.create_secret(secret_id, token).await,
            Step::Set => self.set_secret(secret_id, token).await,
            Step::Test => self.test_secret(secret_id, token).await,
            Step::Finish => self.finish_secret(secret_id, token).await,
        }
    }

    fn resolver(&self) -> SecretResolver<'_> {
        SecretResolver::new(self.store.as_ref(), self.rds.as_ref())
    }

    /// Credential allowed to administer principals for `current`'s scheme:
    /// the master credential when one is referenced, `fallback` otherwise.
    async fn admin_credential(
        &self,
        current: &SecretPayload,
        fallback: &DbCredential,
    ) -> Result<DbCredential, RotationError> {
        match current.master_arn() {
            Some(arn) => {
                self.resolver()
                    .master_credential(arn, &current.credential.dbname)
                    .await
            }
            None => Ok(fallback.clone()),
        }
    }

    async fn open_session(&self, cred: &DbCredential) -> Result<Box<dyn DbSession>, RotationError> {
        self.db
            .connect(&cred.connect_params(self.settings.connect_timeout))
            .await
    }
}

/// Close `session` and hand back `result`. A failed close is logged, never
/// allowed to mask the step's own outcome.
async fn close_after<T>(
    session: Box<dyn DbSession>,
    result: Result<T, RotationError>,
) -> Result<T, RotationError> {
    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close database session");
    }
    result
}
