//! `pg-rotator`: Secrets Manager rotation Lambda for PostgreSQL credentials.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (OTEL + tracing).
//! 3. Initialise AWS SDK clients.
//! 4. Build the [`Rotator`] once and serve rotation events until the runtime
//!    shuts the function down.

mod aws;
mod config;
mod db;
mod rotation;
mod secret;
mod store;
mod telemetry;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use common::RotationEvent;
use lambda_runtime::{service_fn, LambdaEvent};
use tracing::{info, info_span, Instrument};

use aws::{AwsClients, RdsEndpointLookup};
use config::Config;
use db::PostgresDatabase;
use rotation::{RotationSettings, Rotator};
use store::SecretsManagerStore;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        retire_policy = ?cfg.retire_policy,
        username_suffix = ?cfg.username_suffix,
        "pg-rotator starting"
    );

    // -----------------------------------------------------------------------
    // 3. AWS clients
    // -----------------------------------------------------------------------
    let aws = AwsClients::init(cfg.secrets_manager_endpoint.as_deref()).await;

    // -----------------------------------------------------------------------
    // 4. Rotation handler
    // -----------------------------------------------------------------------
    let rotator = Arc::new(Rotator::new(
        Arc::new(SecretsManagerStore::new(aws.secretsmanager.clone())),
        Arc::new(PostgresDatabase),
        Arc::new(RdsEndpointLookup::new(aws.rds.clone())),
        RotationSettings::from(&cfg),
    ));

    let result = lambda_runtime::run(service_fn(move |event: LambdaEvent<RotationEvent>| {
        let rotator = Arc::clone(&rotator);
        let span = info_span!("invocation", request_id = %event.context.request_id);
        async move {
            rotator
                .handle(&event.payload)
                .await
                .map(|_| ())
                .map_err(lambda_runtime::Error::from)
        }
        .instrument(span)
    }))
    .await;

    telemetry::shutdown_telemetry();
    result.map_err(|e| anyhow::anyhow!("lambda runtime exited: {e}"))
}
