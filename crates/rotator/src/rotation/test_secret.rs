use common::{RotationError, Stage, StepOutcome};
use tracing::info;

use super::{close_after, Rotator};
use crate::secret::DbCredential;

impl Rotator {
    /// Log in with the pending credential and run a round trip. Optionally
    /// re-verifies the current credential too.
    pub(crate) async fn test_secret(
        &self,
        secret_id: &str,
        token: &str,
    ) -> Result<StepOutcome, RotationError> {
        let resolver = self.resolver();
        let pending = resolver
            .required_payload(secret_id, Stage::Pending, Some(token))
            .await?;
        self.verify_login(&pending.credential).await?;
        info!(username = %pending.credential.username, "pending credential verified");

        if self.settings.test_current_credentials {
            let current = resolver
                .required_payload(secret_id, Stage::Current, None)
                .await?;
            self.verify_login(&current.credential).await?;
            info!(username = %current.credential.username, "current credential verified");
        }
        Ok(StepOutcome::Applied)
    }

    async fn verify_login(&self, cred: &DbCredential) -> Result<(), RotationError> {
        let mut session = self.open_session(cred).await?;
        let result = session.ping().await;
        close_after(session, result).await
    }
}
