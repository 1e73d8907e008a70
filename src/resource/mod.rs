//! Resource model
//!
//! Promotable resources are single JSON-bodied documents that exist
//! independently per environment, each copy carrying its own monotonic
//! `version`. The engine never interprets field contents; it only compares
//! and copies them.

mod document;
mod editor;
mod environment;

pub use document::{diff_fields, fields_of, ChangeField, Fields, ResourceDocument, ResourceType};
pub use editor::{ResourceDraft, ResourceEditor};
pub use environment::Environment;
