// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Spooler registry.
//!
//! The daemon lazily creates one [`Spooler`] per destination key and keeps it
//! until shutdown. Creation and shutdown go through the same lock, so a
//! spooler created concurrently with shutdown is either signalled with the
//! others or never created.
//!
//! ```text
//!   Emitter ──spooler_for_tag──> registry ──spawn──> Spooler task (1 per key)
//!                                    │
//!   shutdown() ──> run() ──signal each──> await all ──> dispose journal group
//! ```

use crate::config::OutputConfig;
use crate::destination::{destination_for_tag, DestinationKey, DestinationPattern};
use crate::errors::OutputError;
use crate::import::BulkImporter;
use crate::journal::JournalGroup;
use crate::spooler::{Spooler, SpoolerSettings};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Default)]
struct Registry {
    spoolers: HashMap<String, Arc<Spooler>>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

struct DaemonInner {
    journal_group: Arc<dyn JournalGroup>,
    importer: Arc<dyn BulkImporter>,
    settings: SpoolerSettings,
    database_name: DestinationPattern,
    table_name: DestinationPattern,
    registry: Mutex<Registry>,
    shutdown: CancellationToken,
}

/// Cloneable handle on the spooler registry.
#[derive(Clone)]
pub struct SpoolerDaemon {
    inner: Arc<DaemonInner>,
}

impl SpoolerDaemon {
    pub fn new(
        config: &OutputConfig,
        journal_group: Arc<dyn JournalGroup>,
        importer: Arc<dyn BulkImporter>,
    ) -> Self {
        Self {
            inner: Arc::new(DaemonInner {
                journal_group,
                importer,
                settings: SpoolerSettings::from(config),
                database_name: config.database_name.clone(),
                table_name: config.table_name.clone(),
                registry: Mutex::new(Registry::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Routes `tag` to its spooler, creating the spooler on first use.
    pub fn spooler_for_tag(&self, tag: &str) -> Result<Arc<Spooler>, OutputError> {
        let destination =
            destination_for_tag(&self.inner.database_name, &self.inner.table_name, tag)?;
        self.get_or_create_spooler(destination)
    }

    /// Returns the spooler of `destination`. Concurrent callers for the same
    /// key all get the one spooler created by the first of them.
    pub fn get_or_create_spooler(
        &self,
        destination: DestinationKey,
    ) -> Result<Arc<Spooler>, OutputError> {
        let key = destination.key();
        let mut registry = lock(&self.inner.registry);
        if let Some(spooler) = registry.spoolers.get(&key) {
            return Ok(Arc::clone(spooler));
        }
        if registry.closed {
            return Err(OutputError::ShuttingDown);
        }

        let journal = self.inner.journal_group.get_journal(&key)?;
        let spooler = Arc::new(Spooler::new(
            destination,
            journal,
            Arc::clone(&self.inner.importer),
            &self.inner.settings,
        ));
        info!("Spawning spooler {}", key);
        registry.tasks.push(tokio::spawn(Arc::clone(&spooler).run()));
        registry.spoolers.insert(key, Arc::clone(&spooler));
        Ok(spooler)
    }

    pub fn spooler(&self, key: &str) -> Option<Arc<Spooler>> {
        lock(&self.inner.registry).spoolers.get(key).cloned()
    }

    pub fn spooler_count(&self) -> usize {
        lock(&self.inner.registry).spoolers.len()
    }

    /// Asks the daemon to stop its spoolers. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Waits for [`SpoolerDaemon::shutdown`], then signals every spooler, waits
    /// for all of them to terminate and disposes the journal group.
    pub async fn run(self) {
        info!("Spooler daemon started");
        self.inner.shutdown.cancelled().await;
        self.cleanup().await;
        info!("Spooler daemon ended");
    }

    async fn cleanup(&self) {
        let tasks = {
            let mut registry = lock(&self.inner.registry);
            registry.closed = true;
            for spooler in registry.spoolers.values() {
                if spooler.begin_shutdown() {
                    debug!("Signalled spooler {} to shut down", spooler.key());
                }
            }
            std::mem::take(&mut registry.tasks)
        };

        debug!("Waiting for {} spoolers", tasks.len());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Spooler task failed: {}", e);
            }
        }

        if let Err(e) = self.inner.journal_group.dispose() {
            error!("Failed to dispose journal group: {}", e);
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
