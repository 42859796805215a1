pub mod admission_request;
pub mod admission_response;
pub mod api;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod eligibility;
pub mod errors;
pub mod patch;
pub mod tracing;

use ::tracing::{error, info, warn};
use anyhow::{anyhow, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::trace::{self, TraceLayer};

use crate::api::{
    handlers::{mutate_handler, readiness_handler},
    state::ApiServerState,
};
use crate::config::{Config, InjectionConfig, TlsConfig};

/// How long in-flight requests are given to complete once a shutdown is requested
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum size of an AdmissionReview. The API server accepts objects up to
/// 3 MiB and an UPDATE review carries both the new and the old object.
const MUTATE_BODY_LIMIT: usize = 8 * 1024 * 1024;

pub struct InjectorServer {
    router: Router,
    addr: SocketAddr,
    tls_config: Option<RustlsConfig>,
}

impl InjectorServer {
    /// Load the init container configuration referenced by `config` and
    /// build the server.
    pub async fn new_from_config(config: Config) -> Result<Self> {
        let injection_config = InjectionConfig::from_file(&config.injection_config_file)?;

        Self::new(config.addr, config.tls_config, injection_config).await
    }

    pub async fn new(
        addr: SocketAddr,
        tls_config: Option<TlsConfig>,
        injection_config: InjectionConfig,
    ) -> Result<Self> {
        let state = Arc::new(ApiServerState { injection_config });

        let router = Router::new()
            .route(
                "/mutate",
                post(mutate_handler).layer(DefaultBodyLimit::max(MUTATE_BODY_LIMIT)),
            )
            .route("/readiness", get(readiness_handler))
            .with_state(state)
            .layer(
                TraceLayer::new_for_http()
                    .on_response(trace::DefaultOnResponse::new().level(::tracing::Level::DEBUG)),
            );

        let tls_config = match tls_config {
            Some(tls_config) => Some(
                RustlsConfig::from_pem_file(&tls_config.cert_file, &tls_config.key_file)
                    .await
                    .map_err(|e| {
                        anyhow!(
                            "cannot load TLS certificate {} and key {}: {}",
                            tls_config.cert_file,
                            tls_config.key_file,
                            e
                        )
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            router,
            addr,
            tls_config,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve the webhook until a shutdown signal is received.
    pub async fn run(self) -> Result<()> {
        let handle = Handle::new();
        tokio::spawn(shutdown_on_signal(handle.clone()));

        let service = self.router.into_make_service();
        match self.tls_config {
            Some(tls_config) => {
                info!(address = %self.addr, "started HTTPS server");
                axum_server::bind_rustls(self.addr, tls_config)
                    .handle(handle)
                    .serve(service)
                    .await?;
            }
            None => {
                warn!(
                    address = %self.addr,
                    "started HTTP server without TLS, the API server only calls webhooks over HTTPS"
                );
                axum_server::bind(self.addr)
                    .handle(handle)
                    .serve(service)
                    .await?;
            }
        }

        info!("server stopped");
        Ok(())
    }
}

async fn shutdown_on_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown requested");
    handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
}
