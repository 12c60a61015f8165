//! Background indexer: reconciles the upload tree against the catalog and
//! drives pending files through the processing pipeline.
//!
//! One iteration scans and reconciles, then dispatches at most
//! `max_files_per_batch` pending files. The PENDING → PROCESSING transition
//! is the atomic claim that prevents two workers from processing the same
//! file. Iteration failures are logged and the loop continues on the next
//! tick.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use mica_core::config::AppConfig;

use crate::catalog::{FieldUpdate, IndexState, IndexStatus, IndexStatusCatalog};
use crate::rag::RagService;
use crate::retriever::ParseMethod;
use crate::scanner::scan_upload_directory;

/// Counts returned by a manual trigger.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TriggerSummary {
    pub files_scanned: usize,
    pub files_pending: usize,
    pub files_processing: usize,
}

pub struct BackgroundIndexer {
    catalog: Arc<IndexStatusCatalog>,
    rag: Arc<RagService>,
    upload_dir: PathBuf,
    scan_interval: Duration,
    max_files_per_batch: usize,
}

impl BackgroundIndexer {
    pub fn new(config: &AppConfig, rag: Arc<RagService>, catalog: Arc<IndexStatusCatalog>) -> Self {
        info!(
            interval_secs = config.indexing.scan_interval.as_secs(),
            max_files_per_batch = config.indexing.max_files_per_batch,
            "background indexer initialized"
        );

        Self {
            catalog,
            rag,
            upload_dir: config.storage.upload_dir.clone(),
            scan_interval: config.indexing.scan_interval,
            max_files_per_batch: config.indexing.max_files_per_batch,
        }
    }

    /// Spawn the periodic loop. The returned handle finishes after the
    /// shutdown signal flips; an in-flight iteration completes first.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("background indexer task started");
            let mut ticker = interval(self.scan_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_iteration().await {
                            error!(error = %e, "background indexer iteration failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("background indexer shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub async fn run_iteration(&self) -> Result<()> {
        self.scan_and_reconcile().await?;
        self.dispatch_pending().await?;
        Ok(())
    }

    /// Scan the upload tree and reconcile observations against the catalog:
    /// new files become PENDING, hash changes reset to PENDING, unchanged
    /// files are untouched.
    #[tracing::instrument(name = "scan_and_reconcile", skip(self))]
    pub async fn scan_and_reconcile(&self) -> Result<()> {
        let upload_dir = self.upload_dir.clone();
        let observed = tokio::task::spawn_blocking(move || scan_upload_directory(&upload_dir))
            .await
            .context("scan task failed")?;

        let existing: HashMap<String, IndexStatus> = self
            .catalog
            .list()
            .await?
            .into_iter()
            .map(|status| (status.file_path.clone(), status))
            .collect();

        for meta in observed {
            match existing.get(&meta.path) {
                None => {
                    self.catalog.upsert(&IndexStatus::pending(&meta)).await?;
                    info!(path = %meta.path, "new file detected");
                }
                Some(current) if current.file_hash != meta.hash => {
                    self.catalog.upsert(&IndexStatus::pending(&meta)).await?;
                    info!(
                        path = %meta.path,
                        old_hash = %&current.file_hash[..8.min(current.file_hash.len())],
                        new_hash = %&meta.hash[..8.min(meta.hash.len())],
                        "modified file detected, reset to pending"
                    );
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Dispatch up to `max_files_per_batch` pending files into processing.
    #[tracing::instrument(name = "dispatch_pending", skip(self))]
    pub async fn dispatch_pending(&self) -> Result<()> {
        let pending: Vec<IndexStatus> = self
            .catalog
            .list()
            .await?
            .into_iter()
            .filter(|status| status.status == IndexState::Pending)
            .collect();

        if pending.is_empty() {
            debug!("no pending files to process");
            return Ok(());
        }

        let batch_len = pending.len().min(self.max_files_per_batch);
        info!(
            processing = batch_len,
            total_pending = pending.len(),
            "processing pending files"
        );

        for status in pending.into_iter().take(self.max_files_per_batch) {
            self.process_one(status).await;
        }

        Ok(())
    }

    /// Process one file end to end. Never propagates: every failure lands
    /// in the catalog as FAILED with the error text.
    async fn process_one(&self, status: IndexStatus) {
        // Re-read and claim. Confirming the record is still PENDING before
        // the atomic status flip is what prevents double-processing.
        let current = match self.catalog.get(&status.file_path).await {
            Ok(current) => current,
            Err(e) => {
                error!(path = %status.file_path, error = %e, "failed to re-read status");
                return;
            }
        };
        let Some(current) = current else {
            warn!(path = %status.file_path, "file status disappeared before processing");
            return;
        };
        if current.status != IndexState::Pending {
            debug!(
                path = %status.file_path,
                status = current.status.as_str(),
                "skipping file, no longer pending"
            );
            return;
        }

        if let Err(e) = self
            .catalog
            .update_field(&status.file_path, FieldUpdate::Status(IndexState::Processing))
            .await
        {
            error!(path = %status.file_path, error = %e, "failed to claim file for processing");
            return;
        }
        info!(path = %status.file_path, "processing file");

        let absolute = self.upload_dir.join(&status.file_path);
        let outcome = self
            .rag
            .process_document(&absolute, None, ParseMethod::Auto)
            .await;

        let updated = if outcome.is_success() {
            info!(path = %status.file_path, "successfully indexed");
            current.indexed()
        } else {
            let message = outcome
                .error
                .unwrap_or_else(|| "unknown error".to_string());
            error!(path = %status.file_path, error = %message, "failed to index");
            current.failed(message)
        };

        if let Err(e) = self.catalog.upsert(&updated).await {
            error!(path = %status.file_path, error = %e, "failed to record processing outcome");
        }
    }

    /// Manual trigger: one synchronous scan-and-reconcile, then dispatch in
    /// the background so the caller gets counts promptly.
    pub async fn trigger_index(self: &Arc<Self>) -> Result<TriggerSummary> {
        self.scan_and_reconcile().await?;

        let all = self.catalog.list().await?;
        let summary = TriggerSummary {
            files_scanned: all.len(),
            files_pending: all
                .iter()
                .filter(|s| s.status == IndexState::Pending)
                .count(),
            files_processing: all
                .iter()
                .filter(|s| s.status == IndexState::Processing)
                .count(),
        };

        let indexer = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = indexer.dispatch_pending().await {
                error!(error = %e, "triggered dispatch failed");
            }
        });

        info!(
            scanned = summary.files_scanned,
            pending = summary.files_pending,
            processing = summary.files_processing,
            "manual index trigger complete"
        );
        Ok(summary)
    }
}
