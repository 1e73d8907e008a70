//! promoter - staging to production promotion engine
//!
//! Multi-tenant resources (agents, workflows, chatbots, tools, templates)
//! are edited in staging and promoted to production through a two-tier
//! approval workflow. Execution is atomic, snapshotted for rollback and
//! recorded in a data lineage log.

pub mod cli;
pub mod clock;
pub mod config;
pub mod http_server;
pub mod logging;
pub mod promotion;
pub mod resource;
pub mod store;
