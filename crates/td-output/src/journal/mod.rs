// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination append-only buffers.
//!
//! A [`Journal`] accepts encoded records through [`Journal::write`] and hands
//! them back as immutable [`JournalChunk`]s on [`Journal::flush`]. A chunk is
//! only removed from the journal when the [`ChunkHandler`] accepted it, so a
//! failed upload is retried on the next flush.
//!
//! Journals are obtained from a [`JournalGroup`], one group per storage path,
//! which in turn comes from a [`JournalGroupFactory`].

pub mod memory;

use crate::errors::{ImportError, JournalError};
use async_trait::async_trait;
use std::fmt;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// An immutable batch of journaled bytes.
pub trait JournalChunk: fmt::Display + Send + Sync {
    /// Stable identifier, also used as the upload idempotency token.
    fn id(&self) -> &str;

    /// Reads the chunk content from the beginning.
    fn reader(&self) -> std::io::Result<Box<dyn Read + Send + '_>>;

    /// Releases the resources held by this handle. Called exactly once per
    /// handed-out chunk, see [`DisposeGuard`].
    fn dispose(&self);
}

/// Consumer of the chunks produced by [`Journal::flush`].
#[async_trait]
pub trait ChunkHandler: Send + Sync {
    /// Takes ownership of `chunk`. Returning an error keeps the chunk's data
    /// in the journal for the next flush.
    async fn handle(&self, chunk: Box<dyn JournalChunk>) -> Result<(), ImportError>;
}

#[async_trait]
pub trait Journal: Send + Sync {
    fn key(&self) -> &str;

    /// Appends `data`. Safe to call concurrently with [`Journal::flush`].
    fn write(&self, data: &[u8]) -> Result<(), JournalError>;

    /// Hands every chunk written since the last successful flush to `handler`,
    /// oldest first. Stops at the first chunk the handler rejects.
    async fn flush(&self, handler: &dyn ChunkHandler) -> Result<(), JournalError>;

    /// Releases this handle. Calling it more than once is a no-op.
    fn dispose(&self) -> Result<(), JournalError>;
}

pub trait JournalGroup: Send + Sync {
    /// Returns the journal for `key`, the same one for repeated calls.
    fn get_journal(&self, key: &str) -> Result<Arc<dyn Journal>, JournalError>;

    fn dispose(&self) -> Result<(), JournalError>;
}

pub trait JournalGroupFactory: Send + Sync {
    fn get_journal_group(&self, path: &Path) -> Result<Arc<dyn JournalGroup>, JournalError>;
}

/// Owns a chunk and disposes it when dropped, whatever path the handler took.
pub struct DisposeGuard(Box<dyn JournalChunk>);

impl DisposeGuard {
    pub fn new(chunk: Box<dyn JournalChunk>) -> Self {
        Self(chunk)
    }
}

impl Deref for DisposeGuard {
    type Target = dyn JournalChunk;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChunk {
        disposed: Arc<AtomicUsize>,
    }

    impl fmt::Display for CountingChunk {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "counting")
        }
    }

    impl JournalChunk for CountingChunk {
        fn id(&self) -> &str {
            "counting"
        }

        fn reader(&self) -> std::io::Result<Box<dyn Read + Send + '_>> {
            Ok(Box::new(std::io::empty()))
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn failing(guard: &DisposeGuard) -> Result<(), ImportError> {
        Err(ImportError::Payload(format!("cannot ship {}", guard.id())))
    }

    #[test]
    fn test_guard_disposes_once_on_success_and_failure() {
        let disposed = Arc::new(AtomicUsize::new(0));

        {
            let guard = DisposeGuard::new(Box::new(CountingChunk {
                disposed: Arc::clone(&disposed),
            }));
            assert_eq!(guard.id(), "counting");
        }
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        let result = {
            let guard = DisposeGuard::new(Box::new(CountingChunk {
                disposed: Arc::clone(&disposed),
            }));
            failing(&guard)
        };
        assert!(result.is_err());
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }
}
