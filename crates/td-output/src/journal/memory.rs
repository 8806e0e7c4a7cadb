// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory journal.
//!
//! Writes accumulate in a head buffer that is sealed into a chunk once it
//! reaches the maximum chunk size, or when a flush starts. Nothing survives
//! the process, so this is meant for embedders that accept losing buffered
//! records on restart, and for tests.

use super::{ChunkHandler, Journal, JournalChunk, JournalGroup, JournalGroupFactory};
use crate::errors::JournalError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MemoryJournalGroupFactory {
    max_chunk_size: usize,
}

impl MemoryJournalGroupFactory {
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
        }
    }
}

impl JournalGroupFactory for MemoryJournalGroupFactory {
    fn get_journal_group(&self, path: &Path) -> Result<Arc<dyn JournalGroup>, JournalError> {
        debug!("Creating memory journal group for {}", path.display());
        Ok(Arc::new(MemoryJournalGroup::new(
            path.to_path_buf(),
            self.max_chunk_size,
        )))
    }
}

pub struct MemoryJournalGroup {
    path: PathBuf,
    max_chunk_size: usize,
    // Seeds chunk ids so they stay unique across groups.
    nonce: u64,
    journals: Mutex<HashMap<String, Arc<MemoryJournal>>>,
    disposed: AtomicBool,
}

impl MemoryJournalGroup {
    pub fn new(path: PathBuf, max_chunk_size: usize) -> Self {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self {
            path,
            max_chunk_size,
            nonce,
            journals: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the concrete journal for `key`, creating it on first use.
    pub fn memory_journal(&self, key: &str) -> Result<Arc<MemoryJournal>, JournalError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(JournalError::Disposed(self.path.display().to_string()));
        }
        let mut journals = lock(&self.journals);
        let journal = journals.entry(key.to_string()).or_insert_with(|| {
            Arc::new(MemoryJournal::new(key, self.max_chunk_size, self.nonce))
        });
        Ok(Arc::clone(journal))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Every journal handed out so far, disposed or not.
    pub fn journals(&self) -> Vec<Arc<MemoryJournal>> {
        lock(&self.journals).values().cloned().collect()
    }
}

impl JournalGroup for MemoryJournalGroup {
    fn get_journal(&self, key: &str) -> Result<Arc<dyn Journal>, JournalError> {
        let journal: Arc<dyn Journal> = self.memory_journal(key)?;
        Ok(journal)
    }

    fn dispose(&self) -> Result<(), JournalError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for journal in lock(&self.journals).values() {
            journal.dispose()?;
        }
        Ok(())
    }
}

struct ChunkData {
    id: String,
    data: Vec<u8>,
}

#[derive(Default)]
struct JournalState {
    head: Vec<u8>,
    sealed: VecDeque<Arc<ChunkData>>,
    next_seq: u64,
}

pub struct MemoryJournal {
    key: String,
    max_chunk_size: usize,
    nonce: u64,
    state: Mutex<JournalState>,
    flush_lock: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

impl MemoryJournal {
    pub fn new(key: &str, max_chunk_size: usize, nonce: u64) -> Self {
        Self {
            key: key.to_string(),
            max_chunk_size: max_chunk_size.max(1),
            nonce,
            state: Mutex::new(JournalState::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Number of chunks waiting for a successful flush, the head included.
    pub fn pending_chunks(&self) -> usize {
        let state = lock(&self.state);
        state.sealed.len() + usize::from(!state.head.is_empty())
    }

    /// Bytes written but not yet accepted by a flush handler.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes_locked(&lock(&self.state))
    }

    /// Copy of the pending bytes in write order.
    pub fn pending_data(&self) -> Vec<u8> {
        let state = lock(&self.state);
        let mut data = Vec::with_capacity(self.pending_bytes_locked(&state));
        for chunk in &state.sealed {
            data.extend_from_slice(&chunk.data);
        }
        data.extend_from_slice(&state.head);
        data
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn pending_bytes_locked(&self, state: &JournalState) -> usize {
        state.head.len() + state.sealed.iter().map(|c| c.data.len()).sum::<usize>()
    }

    fn seal(&self, state: &mut JournalState) {
        if state.head.is_empty() {
            return;
        }
        let id = format!("{:016x}{:016x}", self.nonce, state.next_seq);
        state.next_seq += 1;
        let data = std::mem::take(&mut state.head);
        debug!("Sealed chunk {} of journal {} ({} bytes)", id, self.key, data.len());
        state.sealed.push_back(Arc::new(ChunkData { id, data }));
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    fn key(&self) -> &str {
        &self.key
    }

    fn write(&self, data: &[u8]) -> Result<(), JournalError> {
        if self.is_disposed() {
            return Err(JournalError::Disposed(self.key.clone()));
        }
        let mut state = lock(&self.state);
        state.head.extend_from_slice(data);
        if state.head.len() >= self.max_chunk_size {
            self.seal(&mut state);
        }
        Ok(())
    }

    async fn flush(&self, handler: &dyn ChunkHandler) -> Result<(), JournalError> {
        let _flushing = self.flush_lock.lock().await;
        let chunks: Vec<Arc<ChunkData>> = {
            let mut state = lock(&self.state);
            self.seal(&mut state);
            state.sealed.iter().cloned().collect()
        };

        for data in chunks {
            let chunk = MemoryChunk {
                data: Arc::clone(&data),
                disposed: AtomicBool::new(false),
            };
            let name = chunk.to_string();
            if let Err(source) = handler.handle(Box::new(chunk)).await {
                return Err(JournalError::Handler {
                    chunk: name,
                    source,
                });
            }
            lock(&self.state)
                .sealed
                .retain(|sealed| !Arc::ptr_eq(sealed, &data));
        }
        Ok(())
    }

    fn dispose(&self) -> Result<(), JournalError> {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            debug!("Disposed journal {}", self.key);
        }
        Ok(())
    }
}

/// Handle on a sealed chunk. The bytes stay owned by the journal until a
/// handler accepts the chunk.
pub struct MemoryChunk {
    data: Arc<ChunkData>,
    disposed: AtomicBool,
}

impl fmt::Display for MemoryChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.data.id, self.data.data.len())
    }
}

impl JournalChunk for MemoryChunk {
    fn id(&self) -> &str {
        &self.data.id
    }

    fn reader(&self) -> std::io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(self.data.data.as_slice()))
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            warn!("Chunk {} disposed more than once", self.data.id);
        }
    }
}

// A panicking writer must not take the whole journal down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
