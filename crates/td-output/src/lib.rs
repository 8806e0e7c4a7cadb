// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote output stage for a log forwarder.
//!
//! Record sets submitted to an [`output::Output`] are routed to one
//! [`spooler::Spooler`] per destination, staged in a per-destination
//! [`journal::Journal`], and periodically uploaded as gzip-compressed msgpack
//! blobs through a [`import::BulkImporter`].
//!
//! ```text
//!   Output::emit ──> queue ──> Emitter ──> SpoolerDaemon ──> Spooler ──> Journal::write
//!                                                              │
//!                                  interval ──> Journal::flush ┴──> blob ──> import
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod blob;
pub mod config;
pub mod daemon;
pub mod destination;
pub mod emitter;
pub mod errors;
pub mod import;
pub mod journal;
pub mod logger;
pub mod output;
pub mod record;
pub mod spooler;

/// Format name handed to the importer for every uploaded chunk.
pub const IMPORT_FORMAT: &str = "msgpack.gz";

/// Compressed blobs stay in memory up to this size and spill to a temp file beyond it.
pub const BLOB_MEMORY_LIMIT: usize = 16 * 1024 * 1024;
