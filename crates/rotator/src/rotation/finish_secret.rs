use common::{RotationError, Stage, StepOutcome};
use tracing::{info, warn};

use super::{close_after, RetirePolicy, Rotator};
use crate::db::{DbSession, DdlOutcome};

impl Rotator {
    /// Retire the outgoing principal, then move `AWSCURRENT` to `token`.
    ///
    /// The database side runs first so a failure leaves the stages untouched
    /// and the whole step can be retried.
    pub(crate) async fn finish_secret(
        &self,
        secret_id: &str,
        token: &str,
    ) -> Result<StepOutcome, RotationError> {
        let meta = self.store.describe(secret_id).await?;
        let current_version = meta.version_with(Stage::Current).map(str::to_owned);
        if current_version.as_deref() == Some(token) {
            info!("version already marked as AWSCURRENT");
            return Ok(StepOutcome::AlreadyDone);
        }

        if let Some(current_version) = current_version.as_deref() {
            let resolver = self.resolver();
            let current = resolver
                .required_payload(secret_id, Stage::Current, Some(current_version))
                .await?;
            let pending = resolver
                .required_payload(secret_id, Stage::Pending, Some(token))
                .await?;

            let outgoing = current.credential.username.as_str();
            let successor = pending.credential.username.as_str();
            if outgoing == successor {
                info!(role = outgoing, "pending reuses the current principal, nothing to retire");
            } else {
                let admin = self.admin_credential(&current, &pending.credential).await?;
                let mut session = self.open_session(&admin).await?;
                let result = self
                    .retire(session.as_mut(), &admin.username, outgoing, successor)
                    .await;
                close_after(session, result).await?;
            }
        }

        self.store
            .update_stage(secret_id, Stage::Current, token, current_version.as_deref())
            .await?;
        info!(
            previous = current_version.as_deref().unwrap_or("none"),
            "moved AWSCURRENT to pending version"
        );
        Ok(StepOutcome::Applied)
    }

    /// Demote `outgoing` according to the retire policy. With inheritance on,
    /// `successor` first receives direct grants for everything it inherited
    /// from `outgoing` in the revoke schema, so the revoke does not reach it.
    async fn retire(
        &self,
        session: &mut dyn DbSession,
        admin: &str,
        outgoing: &str,
        successor: &str,
    ) -> Result<(), RotationError> {
        if !session.role_exists(outgoing).await? {
            warn!(role = outgoing, "outgoing principal no longer exists");
            return Ok(());
        }
        let schema = self.settings.revoke_schema.as_str();
        let inherit = self.settings.inherit_privileges;

        if inherit {
            let grants = session
                .transfer_privileges(schema, outgoing, successor)
                .await?;
            info!(from = outgoing, to = successor, grants, "handed privileges to successor");
        }

        if session.revoke_schema_privileges(schema, outgoing).await? == DdlOutcome::NotFound {
            warn!(role = outgoing, "outgoing principal vanished during retirement");
            return Ok(());
        }
        info!(role = outgoing, schema, "revoked table privileges");

        let policy = self.settings.retire_policy;
        match policy {
            RetirePolicy::RevokeOnly => {}
            RetirePolicy::DisableLogin => {
                tolerate_missing(session.disable_login(outgoing).await?, outgoing);
            }
            RetirePolicy::Drop => {
                drop_principal(session, admin, outgoing, successor).await?;
                info!(role = outgoing, "dropped outgoing principal");
                return Ok(());
            }
        }

        if inherit {
            tolerate_missing(session.revoke_membership(outgoing, successor).await?, outgoing);
        }
        info!(role = outgoing, ?policy, "retired outgoing principal");
        Ok(())
    }
}

/// `DROP ROLE` refuses while the role owns objects or holds grants anywhere
/// in the database. Owned objects go to `successor`; remaining grants are
/// dropped. Both statements need the privileges of the roles involved.
async fn drop_principal(
    session: &mut dyn DbSession,
    admin: &str,
    outgoing: &str,
    successor: &str,
) -> Result<(), RotationError> {
    for role in [outgoing, successor] {
        if role != admin && session.grant_membership(role, admin).await? == DdlOutcome::NotFound {
            return Err(RotationError::DatabaseStatementFailed(format!(
                "cannot drop {outgoing}: role {role} does not exist"
            )));
        }
    }
    tolerate_missing(session.reassign_owned(outgoing, successor).await?, outgoing);
    tolerate_missing(session.drop_owned(outgoing).await?, outgoing);
    tolerate_missing(session.drop_role(outgoing).await?, outgoing);
    Ok(())
}

fn tolerate_missing(outcome: DdlOutcome, role: &str) {
    if outcome == DdlOutcome::NotFound {
        warn!(role, "outgoing principal vanished during retirement");
    }
}
