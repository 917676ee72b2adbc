//! RDS instance/cluster endpoint lookup.
//!
//! RDS-managed master secrets only carry `username` and `password`; the
//! connection endpoint has to be read from the instance or cluster the secret
//! is attached to.

use async_trait::async_trait;
use aws_sdk_rds::error::DisplayErrorContext;
use common::RotationError;

/// Connection details of an RDS instance or Aurora cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbEndpoint {
    pub host: String,
    pub port: u16,
    pub engine: String,
}

/// Describe calls consumed when completing an RDS-managed master secret.
///
/// `Ok(None)` means the identifier resolved to no instance/cluster.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DbEndpointLookup: Send + Sync {
    async fn describe_instance(&self, identifier: &str)
        -> Result<Option<DbEndpoint>, RotationError>;

    async fn describe_cluster(&self, identifier: &str)
        -> Result<Option<DbEndpoint>, RotationError>;
}

/// [`DbEndpointLookup`] backed by the RDS API.
#[derive(Clone)]
pub struct RdsEndpointLookup {
    client: aws_sdk_rds::Client,
}

impl RdsEndpointLookup {
    pub fn new(client: aws_sdk_rds::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DbEndpointLookup for RdsEndpointLookup {
    async fn describe_instance(
        &self,
        identifier: &str,
    ) -> Result<Option<DbEndpoint>, RotationError> {
        let resp = self
            .client
            .describe_db_instances()
            .db_instance_identifier(identifier)
            .send()
            .await
            .map_err(|e| {
                RotationError::ResourceLookup(format!(
                    "DescribeDBInstances failed for {identifier}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let Some(instance) = resp.db_instances().first() else {
            return Ok(None);
        };
        let endpoint = instance.endpoint().ok_or_else(|| {
            RotationError::ResourceLookup(format!("instance {identifier} has no endpoint yet"))
        })?;

        Ok(Some(DbEndpoint {
            host: required(endpoint.address(), "endpoint address", identifier)?,
            port: port(endpoint.port(), identifier)?,
            engine: required(instance.engine(), "engine", identifier)?,
        }))
    }

    async fn describe_cluster(
        &self,
        identifier: &str,
    ) -> Result<Option<DbEndpoint>, RotationError> {
        let resp = self
            .client
            .describe_db_clusters()
            .db_cluster_identifier(identifier)
            .send()
            .await
            .map_err(|e| {
                RotationError::ResourceLookup(format!(
                    "DescribeDBClusters failed for {identifier}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let Some(cluster) = resp.db_clusters().first() else {
            return Ok(None);
        };

        Ok(Some(DbEndpoint {
            host: required(cluster.endpoint(), "endpoint", identifier)?,
            port: port(cluster.port(), identifier)?,
            engine: required(cluster.engine(), "engine", identifier)?,
        }))
    }
}

fn required(value: Option<&str>, what: &str, identifier: &str) -> Result<String, RotationError> {
    value
        .map(str::to_owned)
        .ok_or_else(|| RotationError::ResourceLookup(format!("{identifier} has no {what}")))
}

fn port(value: Option<i32>, identifier: &str) -> Result<u16, RotationError> {
    value
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| RotationError::ResourceLookup(format!("{identifier} has no valid port")))
}
