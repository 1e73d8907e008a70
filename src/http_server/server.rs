//! # HTTP Server
//!
//! Combines the promotion, resource, lineage and health routers.

use std::io;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::config::HttpServerConfig;
use super::health_routes::health_routes;
use super::lineage_routes::lineage_routes;
use super::promotion_routes::promotion_routes;
use super::resource_routes::resource_routes;
use crate::promotion::PromotionService;

/// HTTP server for the promotion API
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, service: Arc<PromotionService>) -> Self {
        let router = Self::build_router(&config, service);
        Self { config, router }
    }

    /// Build the combined router with all endpoints
    pub fn build_router(config: &HttpServerConfig, service: Arc<PromotionService>) -> Router {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .merge(health_routes())
            .merge(promotion_routes(service.clone()))
            .merge(resource_routes(service.clone()))
            .merge(lineage_routes(service))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until the process is stopped.
    pub async fn start(self) -> io::Result<()> {
        let addr = self.config.listen_addr().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "invalid listen address {}:{}: {}",
                    self.config.host, self.config.port, e
                ),
            )
        })?;

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "promotion API listening");
        axum::serve(listener, self.router).await
    }
}
