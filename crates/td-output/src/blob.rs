// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gzip-compressed upload payloads.
//!
//! A chunk is streamed through a gzip encoder into a [`CompressedBlob`]. The
//! blob keeps up to `memory_limit` bytes in memory and moves its content to an
//! anonymous temp file once that limit is crossed, so large chunks do not pin
//! their whole compressed size on the heap while they wait for the upload.

use crate::journal::JournalChunk;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings shared by every blob a spooler builds.
#[derive(Debug, Clone)]
pub struct BlobOptions {
    pub memory_limit: usize,
    pub compression: Compression,
    pub temp_dir: PathBuf,
}

impl Default for BlobOptions {
    fn default() -> Self {
        Self {
            memory_limit: crate::BLOB_MEMORY_LIMIT,
            compression: Compression::fast(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

enum Store {
    Memory(Vec<u8>),
    File(File),
}

/// Write sink that spills to a temp file past `memory_limit` bytes.
struct SpillingWriter<'a> {
    store: Store,
    len: u64,
    memory_limit: usize,
    temp_dir: &'a Path,
}

impl Write for SpillingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Store::Memory(data) = &mut self.store {
            if data.len() + buf.len() > self.memory_limit {
                let mut file = tempfile::tempfile_in(self.temp_dir)?;
                file.write_all(data)?;
                debug!(
                    "Compressed blob exceeded {} bytes, spilling to {}",
                    self.memory_limit,
                    self.temp_dir.display()
                );
                self.store = Store::File(file);
            }
        }
        let written = match &mut self.store {
            Store::Memory(data) => {
                data.extend_from_slice(buf);
                buf.len()
            }
            Store::File(file) => file.write(buf)?,
        };
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.store {
            Store::Memory(_) => Ok(()),
            Store::File(file) => file.flush(),
        }
    }
}

/// A compressed chunk ready for upload.
pub struct CompressedBlob {
    store: Store,
    len: u64,
}

impl CompressedBlob {
    /// Compresses the whole content of `chunk`.
    pub fn from_chunk(chunk: &dyn JournalChunk, options: &BlobOptions) -> io::Result<Self> {
        let mut reader = chunk.reader()?;
        Self::compress(&mut reader, options)
    }

    pub fn compress(reader: &mut dyn Read, options: &BlobOptions) -> io::Result<Self> {
        let sink = SpillingWriter {
            store: Store::Memory(Vec::new()),
            len: 0,
            memory_limit: options.memory_limit,
            temp_dir: &options.temp_dir,
        };
        let mut encoder = GzEncoder::new(sink, options.compression);
        io::copy(reader, &mut encoder)?;
        let sink = encoder.finish()?;
        Ok(Self {
            store: sink.store,
            len: sink.len,
        })
    }

    /// Compressed size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.store, Store::File(_))
    }

    /// Reads the compressed bytes back.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self.store {
            Store::Memory(data) => Ok(data),
            Store::File(mut file) => {
                file.seek(SeekFrom::Start(0))?;
                let mut data = Vec::with_capacity(self.len as usize);
                file.read_to_end(&mut data)?;
                Ok(data)
            }
        }
    }
}

impl std::fmt::Debug for CompressedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedBlob")
            .field("len", &self.len)
            .field("spilled", &self.is_spilled())
            .finish()
    }
}
