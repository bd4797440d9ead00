// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use recon_telemetry::{
    analytics::{AnalyticsStore, ClickHouseAnalyticsStore},
    bounded_store::{BoundedStore, InMemoryBoundedStore, RedisBoundedStore},
    config::{Config, StoreBackend},
    telemetry_server::TelemetryServer,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("RECON_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on telemetry server startup: {e}");
            return;
        }
    };

    let store: Arc<dyn BoundedStore> = match config.store_backend {
        StoreBackend::Redis => {
            match RedisBoundedStore::connect(&config.redis_url, config.telemetry_key.clone()).await
            {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!("Unable to connect to the bounded store: {e}");
                    return;
                }
            }
        }
        StoreBackend::Memory => {
            info!("Using in-memory bounded store, telemetry will not survive a restart");
            Arc::new(InMemoryBoundedStore::new())
        }
    };

    let analytics: Arc<dyn AnalyticsStore> =
        match ClickHouseAnalyticsStore::new(&config.clickhouse) {
            Ok(analytics) => Arc::new(analytics),
            Err(e) => {
                error!("Unable to create the analytical store client: {e}");
                return;
            }
        };

    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_shutdown_signal(cancel.clone()));

    let server = TelemetryServer {
        config: Arc::clone(&config),
        store,
        analytics,
    };
    if let Err(e) = server.start(cancel).await {
        error!("Error when running telemetry server: {e:?}");
        return;
    }
    info!("Telemetry server stopped");
}

async fn wait_for_shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Unable to listen for SIGINT: {e}");
                }
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => debug!("Received SIGINT"),
            _ = sigterm.recv() => debug!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for ctrl-c: {e}");
        }
    }

    info!("Shutdown requested, draining intake queue");
    cancel.cancel();
}
