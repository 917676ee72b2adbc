//! [`SecretStore`] backed by AWS Secrets Manager.

use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use common::{RotationError, Stage};
use tracing::debug;

use super::{PasswordPolicy, PutOutcome, SecretMetadata, SecretStore, SecretValue};

#[derive(Clone)]
pub struct SecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerStore {
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }
}

fn store_error<E>(op: &str, secret_id: &str, err: E) -> RotationError
where
    E: std::error::Error,
{
    RotationError::SecretStore(format!(
        "{op} failed for {secret_id}: {}",
        DisplayErrorContext(err)
    ))
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn describe(&self, secret_id: &str) -> Result<SecretMetadata, RotationError> {
        let resp = self
            .client
            .describe_secret()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| store_error("DescribeSecret", secret_id, e))?;

        let versions = resp
            .version_ids_to_stages()
            .map(|m| {
                m.iter()
                    .map(|(id, stages)| (id.clone(), stages.iter().cloned().collect()))
                    .collect()
            })
            .unwrap_or_default();

        let tags = resp
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_owned(), t.value().unwrap_or_default().to_owned())))
            .collect();

        Ok(SecretMetadata {
            rotation_enabled: resp.rotation_enabled(),
            versions,
            tags,
        })
    }

    async fn get_value(
        &self,
        secret_id: &str,
        stage: Stage,
        version_id: Option<&str>,
    ) -> Result<Option<SecretValue>, RotationError> {
        let result = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .version_stage(stage.as_str())
            .set_version_id(version_id.map(str::to_owned))
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                debug!(secret_id, stage = %stage, version_id, "secret version not found");
                return Ok(None);
            }
            Err(e) => return Err(store_error("GetSecretValue", secret_id, e)),
        };

        let secret_string = resp.secret_string().ok_or_else(|| {
            RotationError::InvalidSecretSchema(format!(
                "{secret_id} at {stage} has no SecretString (binary secrets are not supported)"
            ))
        })?;

        Ok(Some(SecretValue {
            version_id: resp
                .version_id()
                .or(version_id)
                .unwrap_or_default()
                .to_owned(),
            secret_string: secret_string.to_owned(),
        }))
    }

    async fn put_pending(
        &self,
        secret_id: &str,
        version_id: &str,
        secret_string: &str,
    ) -> Result<PutOutcome, RotationError> {
        let result = self
            .client
            .put_secret_value()
            .secret_id(secret_id)
            .client_request_token(version_id)
            .secret_string(secret_string)
            .version_stages(Stage::Pending.as_str())
            .send()
            .await;

        match result {
            Ok(_) => Ok(PutOutcome::Created),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_exists_exception()) =>
            {
                Ok(PutOutcome::AlreadyExists)
            }
            Err(e) => Err(store_error("PutSecretValue", secret_id, e)),
        }
    }

    async fn update_stage(
        &self,
        secret_id: &str,
        stage: Stage,
        move_to: &str,
        remove_from: Option<&str>,
    ) -> Result<(), RotationError> {
        self.client
            .update_secret_version_stage()
            .secret_id(secret_id)
            .version_stage(stage.as_str())
            .move_to_version_id(move_to)
            .set_remove_from_version_id(remove_from.map(str::to_owned))
            .send()
            .await
            .map_err(|e| store_error("UpdateSecretVersionStage", secret_id, e))?;
        Ok(())
    }

    async fn random_password(&self, policy: &PasswordPolicy) -> Result<String, RotationError> {
        let resp = self
            .client
            .get_random_password()
            .password_length(i64::from(policy.length))
            .exclude_characters(&policy.exclude_characters)
            .include_space(false)
            .require_each_included_type(policy.require_each_type)
            .send()
            .await
            .map_err(|e| store_error("GetRandomPassword", "-", e))?;

        resp.random_password()
            .map(str::to_owned)
            .ok_or_else(|| RotationError::SecretStore("GetRandomPassword returned no password".into()))
    }
}
