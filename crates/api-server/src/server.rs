//! API server: REST endpoints plus the Prometheus exporter.

use crate::rest::AppState;
use crate::router::build_router;
use bandit_core::config::AppConfig;
use bandit_lifecycle::ExperimentService;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub struct ApiServer {
    config: AppConfig,
    service: Arc<ExperimentService>,
}

impl ApiServer {
    pub fn new(config: AppConfig, service: Arc<ExperimentService>) -> Self {
        Self { config, service }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState::new(self.service.clone(), self.config.node_id.clone());
        let app = build_router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
