use chrono::Utc;
use common::{RotationError, Stage, StepOutcome};
use tracing::{info, warn};

use super::username::next_username;
use super::Rotator;
use crate::store::PutOutcome;

impl Rotator {
    /// Stage a new credential for `token`, derived from the current one.
    ///
    /// Never contacts the database. An existing pending payload for `token`
    /// is left untouched.
    pub(crate) async fn create_secret(
        &self,
        secret_id: &str,
        token: &str,
    ) -> Result<StepOutcome, RotationError> {
        let resolver = self.resolver();
        let current = resolver
            .required_payload(secret_id, Stage::Current, None)
            .await?;

        if resolver
            .payload(secret_id, Stage::Pending, Some(token))
            .await?
            .is_some()
        {
            info!("pending secret already exists");
            return Ok(StepOutcome::AlreadyDone);
        }

        let strategy = self.settings.username_suffix;
        let username = next_username(
            &current.credential.username,
            strategy,
            &strategy.generate(Utc::now()),
        );
        let password = self.store.random_password(&self.settings.password).await?;
        let pending = current.with_credentials(username, password);

        match self
            .store
            .put_pending(secret_id, token, &pending.to_secret_string())
            .await?
        {
            PutOutcome::Created => {
                info!(username = %pending.credential.username, "staged pending secret");
                Ok(StepOutcome::Applied)
            }
            PutOutcome::AlreadyExists => {
                warn!("pending secret was written concurrently, keeping the existing version");
                Ok(StepOutcome::AlreadyDone)
            }
        }
    }
}
