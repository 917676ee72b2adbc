use common::{RotationError, Stage, StepOutcome};
use tracing::{info, warn};

use super::{close_after, Rotator};
use crate::db::{DbSession, DdlOutcome};
use crate::secret::DbCredential;

impl Rotator {
    /// Make the pending credential valid in the database.
    ///
    /// A principal that already exists under the pending name gets its
    /// password reset instead of being created again.
    pub(crate) async fn set_secret(
        &self,
        secret_id: &str,
        token: &str,
    ) -> Result<StepOutcome, RotationError> {
        let resolver = self.resolver();
        let current = resolver
            .required_payload(secret_id, Stage::Current, None)
            .await?;
        let pending = resolver
            .required_payload(secret_id, Stage::Pending, Some(token))
            .await?;

        let admin = self.admin_credential(&current, &current.credential).await?;
        let mut session = self.open_session(&admin).await?;
        let result = self
            .provision(session.as_mut(), &current.credential, &pending.credential)
            .await;
        close_after(session, result).await
    }

    async fn provision(
        &self,
        session: &mut dyn DbSession,
        current: &DbCredential,
        pending: &DbCredential,
    ) -> Result<StepOutcome, RotationError> {
        let role = pending.username.as_str();
        // The successor administers the next rotation in the single-user
        // scheme, so it keeps the current principal's CREATEROLE.
        let create_role = session.can_create_roles(&current.username).await?;

        let outcome = if session.role_exists(role).await? {
            info!(role, "principal already exists, resetting its password");
            reset_password(session, pending, create_role).await?;
            StepOutcome::AlreadyDone
        } else {
            match session
                .create_login_role(role, &pending.password, create_role)
                .await?
            {
                DdlOutcome::Applied => {
                    info!(role, create_role, "created principal");
                    StepOutcome::Applied
                }
                DdlOutcome::AlreadyExists | DdlOutcome::NotFound => {
                    warn!(role, "principal appeared concurrently, resetting its password");
                    reset_password(session, pending, create_role).await?;
                    StepOutcome::AlreadyDone
                }
            }
        };

        if self.settings.inherit_privileges && current.username != pending.username {
            match session.grant_membership(&current.username, role).await? {
                DdlOutcome::Applied | DdlOutcome::AlreadyExists => {
                    info!(role, granted = %current.username, "granted membership");
                }
                DdlOutcome::NotFound => {
                    return Err(RotationError::DatabaseStatementFailed(format!(
                        "cannot grant {} to {role}: role does not exist",
                        current.username
                    )))
                }
            }
        }
        Ok(outcome)
    }
}

async fn reset_password(
    session: &mut dyn DbSession,
    cred: &DbCredential,
    create_role: bool,
) -> Result<(), RotationError> {
    match session
        .set_password(&cred.username, &cred.password, create_role)
        .await?
    {
        DdlOutcome::Applied | DdlOutcome::AlreadyExists => Ok(()),
        DdlOutcome::NotFound => Err(RotationError::DatabaseStatementFailed(format!(
            "role {} disappeared while setting its password",
            cred.username
        ))),
    }
}
