// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Public entry point of the output stage.
//!
//! Shutdown is a cascade: [`Output::stop`] closes the inbound queue, the
//! emitter drains what was already queued and then stops the daemon, which
//! signals every spooler, waits for them and disposes the journal group.

use crate::config::OutputConfig;
use crate::daemon::SpoolerDaemon;
use crate::emitter::{Emitter, EmitterQueue};
use crate::errors::OutputError;
use crate::import::{BulkImporter, HttpImporter};
use crate::journal::JournalGroupFactory;
use crate::record::RecordSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Output {
    queue_tx: Mutex<Option<EmitterQueue>>,
    queue_rx: Mutex<Option<mpsc::Receiver<Vec<RecordSet>>>>,
    daemon: SpoolerDaemon,
    is_shutting_down: AtomicBool,
    started: AtomicBool,
    terminated: CancellationToken,
}

impl Output {
    /// Builds an output around `importer`. The journal group is opened at
    /// `config.journal_group_path`.
    pub fn new(
        config: &OutputConfig,
        importer: Arc<dyn BulkImporter>,
        journal_group_factory: &dyn JournalGroupFactory,
    ) -> Result<Self, OutputError> {
        config.validate()?;
        let journal_group = journal_group_factory
            .get_journal_group(&config.journal_group_path)
            .map_err(|e| {
                OutputError::Construction(format!(
                    "journal group at {}: {}",
                    config.journal_group_path.display(),
                    e
                ))
            })?;

        let (tx, rx) = mpsc::channel(config.emitter_queue_size);
        Ok(Self {
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: Mutex::new(Some(rx)),
            daemon: SpoolerDaemon::new(config, journal_group, importer),
            is_shutting_down: AtomicBool::new(false),
            started: AtomicBool::new(false),
            terminated: CancellationToken::new(),
        })
    }

    /// Builds an output uploading over HTTP to the configured endpoint.
    pub fn from_config(
        config: &OutputConfig,
        journal_group_factory: &dyn JournalGroupFactory,
    ) -> Result<Self, OutputError> {
        let importer = HttpImporter::new(config)?;
        Self::new(config, Arc::new(importer), journal_group_factory)
    }

    /// Spawns the emitter and the spooler daemon on the current runtime.
    pub fn start(&self) -> Result<(), OutputError> {
        let rx = lock(&self.queue_rx)
            .take()
            .ok_or(OutputError::AlreadyStarted)?;
        self.started.store(true, Ordering::Release);

        let emitter = tokio::spawn(Emitter::new(rx, self.daemon.clone()).run());
        let daemon = tokio::spawn(self.daemon.clone().run());
        // The watcher owns the join handles, waiters only observe `terminated`.
        tokio::spawn(watch(vec![emitter, daemon], self.terminated.clone()));
        info!("Output started");
        Ok(())
    }

    /// Queues `record_sets` for the emitter, waiting while the queue is full.
    /// Submissions after [`Output::stop`] are dropped.
    pub async fn emit(&self, record_sets: Vec<RecordSet>) {
        if self.is_shutting_down() {
            debug!("Output is shutting down, dropping {} record sets", record_sets.len());
            return;
        }
        let Some(tx) = lock(&self.queue_tx).clone() else {
            return;
        };
        if tx.send(record_sets).await.is_err() {
            debug!("Emitter queue closed, record sets dropped");
        }
    }

    /// Closes the inbound queue. Only the first call has an effect.
    pub fn stop(&self) {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!("Stopping output");
        lock(&self.queue_tx).take();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Acquire)
    }

    /// Waits for the emitter and the daemon to end. Returns immediately if
    /// the output was never started. Cancel safe, any number of callers may wait.
    pub async fn wait_for_shutdown(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        self.terminated.cancelled().await;
    }

    pub fn spooler_count(&self) -> usize {
        self.daemon.spooler_count()
    }
}

async fn watch(tasks: Vec<JoinHandle<()>>, terminated: CancellationToken) {
    for task in tasks {
        if let Err(e) = task.await {
            error!("Output task failed: {}", e);
        }
    }
    terminated.cancel();
    info!("Output stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
