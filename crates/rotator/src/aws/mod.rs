//! AWS SDK clients for Secrets Manager and RDS.
//!
//! Both clients share one [`aws_config::SdkConfig`] so credentials from the
//! Lambda execution role are resolved once per process.

pub mod clients;
pub mod rds;

pub use clients::AwsClients;
pub use rds::{DbEndpoint, DbEndpointLookup, RdsEndpointLookup};
