// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::daemon::SpoolerDaemon;
use crate::errors::OutputError;
use crate::record::{encode_records, RecordSet};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub type EmitterQueue = mpsc::Sender<Vec<RecordSet>>;

/// Drains the inbound queue, encodes each record set and appends it to the
/// journal of its destination. When the queue closes, the daemon is told to
/// shut down.
pub struct Emitter {
    rx: mpsc::Receiver<Vec<RecordSet>>,
    daemon: SpoolerDaemon,
}

impl Emitter {
    pub fn new(rx: mpsc::Receiver<Vec<RecordSet>>, daemon: SpoolerDaemon) -> Self {
        Self { rx, daemon }
    }

    pub async fn run(mut self) {
        info!("Emitter started");
        let mut buf = Vec::new();
        while let Some(batch) = self.rx.recv().await {
            for record_set in batch {
                if record_set.records.is_empty() {
                    continue;
                }
                if let Err(e) = self.write(&mut buf, &record_set) {
                    error!("Failed to emit records for tag {}: {}", record_set.tag, e);
                }
            }
        }
        debug!("Emitter queue closed");
        self.daemon.shutdown();
        info!("Emitter ended");
    }

    fn write(&self, buf: &mut Vec<u8>, record_set: &RecordSet) -> Result<(), OutputError> {
        let spooler = self.daemon.spooler_for_tag(&record_set.tag)?;
        buf.clear();
        encode_records(buf, &record_set.records)?;
        spooler.journal().write(buf)?;
        Ok(())
    }
}
