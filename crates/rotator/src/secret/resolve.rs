//! Fetching and validating payloads from the secret store.

use common::{RotationError, Stage};
use serde_json::Value;
use tracing::{info, warn};

use super::payload::{parse_object, DbCredential, SecretPayload};
use crate::aws::DbEndpointLookup;
use crate::store::SecretStore;

/// Longest DB instance/cluster ARN accepted from a system tag.
pub const MAX_RDS_ARN_LENGTH: usize = 256;

const INSTANCE_ARN_TAG: &str = "aws:rds:primarydbinstancearn";
const CLUSTER_ARN_TAG: &str = "aws:rds:primarydbclusterarn";

/// Which RDS resource an RDS-managed master secret belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdsResource {
    Instance(String),
    Cluster(String),
}

/// Reads payloads for a stage, and completes master credentials.
pub struct SecretResolver<'a> {
    store: &'a dyn SecretStore,
    rds: &'a dyn DbEndpointLookup,
}

impl<'a> SecretResolver<'a> {
    pub fn new(store: &'a dyn SecretStore, rds: &'a dyn DbEndpointLookup) -> Self {
        Self { store, rds }
    }

    /// Payload of the version carrying `stage` (and matching `version_id`, if
    /// given). `Ok(None)` when no such version exists.
    pub async fn payload(
        &self,
        secret_id: &str,
        stage: Stage,
        version_id: Option<&str>,
    ) -> Result<Option<SecretPayload>, RotationError> {
        match self.store.get_value(secret_id, stage, version_id).await? {
            Some(value) => SecretPayload::parse(&value.secret_string)
                .map(Some)
                .map_err(|e| with_context(e, secret_id, stage)),
            None => Ok(None),
        }
    }

    /// Like [`Self::payload`], but a missing version is an error.
    pub async fn required_payload(
        &self,
        secret_id: &str,
        stage: Stage,
        version_id: Option<&str>,
    ) -> Result<SecretPayload, RotationError> {
        self.payload(secret_id, stage, version_id)
            .await?
            .ok_or_else(|| {
                RotationError::UnknownVersionOrStage(match version_id {
                    Some(v) => format!("secret {secret_id} has no version {v} at {stage}"),
                    None => format!("secret {secret_id} has no version at {stage}"),
                })
            })
    }

    /// Resolve the master credential named by a rotating secret.
    ///
    /// The master's database name is always taken from the rotating secret.
    /// An RDS-managed master secret holds only `username` and `password`;
    /// its host, port and engine are filled in from the instance or cluster
    /// named by the secret's system tags.
    pub async fn master_credential(
        &self,
        master_arn: &str,
        dbname: &str,
    ) -> Result<DbCredential, RotationError> {
        let value = self
            .store
            .get_value(master_arn, Stage::Current, None)
            .await?
            .ok_or_else(|| {
                RotationError::SecretStore(format!("master secret {master_arn} has no AWSCURRENT version"))
            })?;
        let mut map = parse_object(&value.secret_string)
            .map_err(|e| with_context(e, master_arn, Stage::Current))?;

        if is_credentials_only(&map) {
            if let Some(resource) = self.rds_resource(master_arn).await? {
                let endpoint = match &resource {
                    RdsResource::Instance(arn) => self.rds.describe_instance(arn).await?,
                    RdsResource::Cluster(arn) => self.rds.describe_cluster(arn).await?,
                }
                .ok_or_else(|| {
                    RotationError::ResourceLookup(format!(
                        "{resource:?} did not resolve to any RDS resource"
                    ))
                })?;
                map.insert("host".into(), endpoint.host.into());
                map.insert("port".into(), endpoint.port.into());
                map.insert("engine".into(), endpoint.engine.into());
                info!(master_arn, "filled master connection details from RDS");
            }
        }

        map.insert("dbname".into(), dbname.into());
        DbCredential::from_map(&map).map_err(|e| with_context(e, master_arn, Stage::Current))
    }

    /// RDS resource named by `secret_id`'s system tags, if any.
    async fn rds_resource(&self, secret_id: &str) -> Result<Option<RdsResource>, RotationError> {
        let meta = self.store.describe(secret_id).await?;
        let found = meta.tags.iter().rev().find_map(|(key, value)| {
            match key.to_ascii_lowercase().as_str() {
                INSTANCE_ARN_TAG => Some(RdsResource::Instance(value.clone())),
                CLUSTER_ARN_TAG => Some(RdsResource::Cluster(value.clone())),
                _ => None,
            }
        });

        let Some(resource) = found else {
            warn!(
                secret_id,
                "master secret carries no {INSTANCE_ARN_TAG} or {CLUSTER_ARN_TAG} tag"
            );
            return Ok(None);
        };

        let (RdsResource::Instance(arn) | RdsResource::Cluster(arn)) = &resource;
        if arn.len() > MAX_RDS_ARN_LENGTH {
            return Err(RotationError::InvalidSecretSchema(format!(
                "{arn} is not a valid DB ARN: it exceeds {MAX_RDS_ARN_LENGTH} characters"
            )));
        }
        Ok(Some(resource))
    }
}

fn is_credentials_only(map: &serde_json::Map<String, Value>) -> bool {
    map.len() == 2 && map.contains_key("username") && map.contains_key("password")
}

fn with_context(err: RotationError, secret_id: &str, stage: Stage) -> RotationError {
    match err {
        RotationError::InvalidSecretSchema(msg) => {
            RotationError::InvalidSecretSchema(format!("{secret_id} at {stage}: {msg}"))
        }
        other => other,
    }
}
