//! # HTTP Server Module
//!
//! Axum server exposing the promotion engine.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `/promotions/*` - Request lifecycle, execution and rollback
//! - `/resources/{env}/{id}` - Per-environment resource copies
//! - `/comparisons/{id}` - Staging/production comparison
//! - `/lineage/*` - Data lineage queries
//!
//! Callers identify themselves with the `x-user-id`, `x-user-role` and
//! `x-organization-id` headers set by the upstream auth layer.

pub mod config;
pub mod errors;
pub mod health_routes;
pub mod identity;
pub mod lineage_routes;
pub mod promotion_routes;
pub mod resource_routes;
pub mod server;

pub use config::HttpServerConfig;
pub use errors::ErrorResponse;
pub use server::HttpServer;
