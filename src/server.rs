use crate::config::Config;
use crate::error::LimiterError;
use crate::handlers::{check_rate_limit, health_check, readiness_check, AppState, SharedState};
use crate::limiter::RateLimiter;
use crate::middleware::logging_middleware;
use crate::policy::PolicyConfig;
use crate::store::{KeyValueStore, RedisStore};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the router over any store backend.
pub fn create_app<S: KeyValueStore + 'static>(state: SharedState<S>) -> Router {
    Router::new()
        .route("/v1/check/:scope", post(check_rate_limit::<S>))
        .route("/health", get(health_check::<S>))
        .route("/ready", get(readiness_check::<S>))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    /// Connects to the configured store and loads scope policies.
    pub async fn new(config: Config) -> Result<Self, LimiterError> {
        let policies = match &config.policy_file {
            Some(path) => PolicyConfig::from_file(path, config.default_policy())?,
            None => PolicyConfig::with_default(config.default_policy()),
        };

        let limiter: RateLimiter<RedisStore> =
            RateLimiter::connect(&config.store_config(), config.limiter_options()).await?;

        Ok(Self {
            app: create_app(AppState::new(limiter, policies)),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Gatekeeper listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
