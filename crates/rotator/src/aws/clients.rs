//! AWS SDK client bundle.

use aws_config::BehaviorVersion;

/// Bundle of AWS SDK clients used by the rotation handler.
#[derive(Clone)]
pub struct AwsClients {
    /// Secrets Manager client: describe, get/put values, stage moves, password generation.
    pub secretsmanager: aws_sdk_secretsmanager::Client,
    /// RDS client used to complete RDS-managed master credentials.
    pub rds: aws_sdk_rds::Client,
}

impl AwsClients {
    /// Initialise all AWS SDK clients.
    ///
    /// `secrets_manager_endpoint` overrides the Secrets Manager endpoint, for
    /// functions that reach it through an interface VPC endpoint. Credentials
    /// and region come from the standard provider chain.
    pub async fn init(secrets_manager_endpoint: Option<&str>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let mut sm = aws_sdk_secretsmanager::config::Builder::from(&config);
        if let Some(endpoint) = secrets_manager_endpoint {
            sm = sm.endpoint_url(endpoint);
        }
        let secretsmanager = aws_sdk_secretsmanager::Client::from_conf(sm.build());

        let rds = aws_sdk_rds::Client::new(&config);

        Self {
            secretsmanager,
            rds,
        }
    }
}
