// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination flush worker.
//!
//! A spooler owns the journal of one destination. Every flush interval it
//! flushes the journal, compresses each chunk and hands it to the importer.
//! A chunk whose upload fails stays in the journal and goes out with the next
//! tick; there is no other retry.

use crate::blob::{BlobOptions, CompressedBlob};
use crate::config::OutputConfig;
use crate::destination::DestinationKey;
use crate::errors::ImportError;
use crate::import::BulkImporter;
use crate::journal::{ChunkHandler, DisposeGuard, Journal, JournalChunk};
use async_trait::async_trait;
use flate2::Compression;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Settings shared by all spoolers of an output.
#[derive(Debug, Clone)]
pub struct SpoolerSettings {
    pub flush_interval: Duration,
    pub flush_on_shutdown: bool,
    pub blob: BlobOptions,
}

impl From<&OutputConfig> for SpoolerSettings {
    fn from(config: &OutputConfig) -> Self {
        Self {
            flush_interval: config.flush_interval,
            flush_on_shutdown: config.flush_on_shutdown,
            blob: BlobOptions {
                memory_limit: crate::BLOB_MEMORY_LIMIT,
                compression: Compression::fast(),
                temp_dir: config.temp_dir.clone(),
            },
        }
    }
}

/// Uploads the chunks of one destination.
struct Uploader {
    destination: DestinationKey,
    importer: Arc<dyn BulkImporter>,
    blob: BlobOptions,
}

#[async_trait]
impl ChunkHandler for Uploader {
    async fn handle(&self, chunk: Box<dyn JournalChunk>) -> Result<(), ImportError> {
        let chunk = DisposeGuard::new(chunk);
        info!("Flushing chunk {}", &*chunk);
        let blob = CompressedBlob::from_chunk(&*chunk, &self.blob)
            .map_err(|e| ImportError::Payload(format!("chunk {}: {}", chunk.id(), e)))?;
        let result = self
            .importer
            .import(
                &self.destination.namespace,
                &self.destination.relation,
                crate::IMPORT_FORMAT,
                blob,
                chunk.id(),
            )
            .await;
        match result {
            Ok(result) => {
                debug!(
                    "Chunk {} imported into {} in {}s",
                    chunk.id(),
                    self.destination,
                    result.elapsed_time
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to import chunk {}: {}", chunk.id(), e);
                Err(e)
            }
        }
    }
}

pub struct Spooler {
    key: String,
    journal: Arc<dyn Journal>,
    uploader: Uploader,
    flush_interval: Duration,
    flush_on_shutdown: bool,
    is_shutting_down: AtomicBool,
    shutdown: Notify,
    flushes: AtomicU64,
}

impl Spooler {
    pub fn new(
        destination: DestinationKey,
        journal: Arc<dyn Journal>,
        importer: Arc<dyn BulkImporter>,
        settings: &SpoolerSettings,
    ) -> Self {
        Self {
            key: destination.key(),
            journal,
            uploader: Uploader {
                destination,
                importer,
                blob: settings.blob.clone(),
            },
            flush_interval: settings.flush_interval,
            flush_on_shutdown: settings.flush_on_shutdown,
            is_shutting_down: AtomicBool::new(false),
            shutdown: Notify::new(),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn destination(&self) -> &DestinationKey {
        &self.uploader.destination
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    /// Completed flushes, shutdown flush included.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Acquire)
    }

    /// Moves the spooler from running to shutting down. Only the caller that
    /// wins the transition signals the task, so the signal is sent once.
    pub fn begin_shutdown(&self) -> bool {
        let won = self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.shutdown.notify_one();
        }
        won
    }

    /// Flush loop. Returns once the shutdown signal arrived and the journal
    /// handle is disposed.
    pub async fn run(self: Arc<Self>) {
        info!("Spooler {} started", self.key);
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        // A slow upload delays the next tick instead of queueing a burst of them.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush().await,
                _ = self.shutdown.notified() => break,
            }
        }

        debug!("Spooler {} draining", self.key);
        if self.flush_on_shutdown {
            self.flush().await;
        }
        if let Err(e) = self.journal.dispose() {
            error!("Failed to dispose journal {}: {}", self.key, e);
        }
        info!("Spooler {} ended", self.key);
    }

    async fn flush(&self) {
        debug!("Flushing {}...", self.key);
        if let Err(e) = self.journal.flush(&self.uploader).await {
            error!("Error during reading from the journal: {}", e);
        }
        self.flushes.fetch_add(1, Ordering::AcqRel);
    }
}
