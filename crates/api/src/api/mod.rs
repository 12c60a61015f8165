//! HTTP surface: thin adapters translating the documented endpoints into
//! facade / catalog / indexer calls.

pub mod config;
pub mod documents;
pub mod files;
pub mod graph;
pub mod health;
pub mod query;

use std::sync::Arc;

use crate::indexer::BackgroundIndexer;

/// The background indexer as app data. Absent when auto-indexing is
/// disabled in configuration; the trigger endpoint answers 503 then.
#[derive(Clone)]
pub struct IndexerHandle(pub Option<Arc<BackgroundIndexer>>);
