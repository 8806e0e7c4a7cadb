// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use flate2::read::GzDecoder;
use mockito::{Matcher, Server};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use td_output::{
    blob::{BlobOptions, CompressedBlob},
    config::OutputConfig,
    destination::{DestinationKey, DestinationPattern},
    errors::ImportError,
    import::{BulkImporter, HttpImporter, ImportResult},
    journal::{memory::MemoryJournal, memory::MemoryJournalGroupFactory, Journal},
    output::Output,
    record::{decode_records, encode_records, Record, RecordSet},
    spooler::{Spooler, SpoolerSettings},
};
use tokio::time::{sleep, timeout, Duration};

const IMPORT_PATH: &str = r"^/v3/table/import_with_id/app/web/[0-9a-f]{32}/msgpack\.gz$";

fn config(server: &Server) -> OutputConfig {
    OutputConfig {
        endpoint: Some(server.url()),
        api_key: "mock-api-key".to_string(),
        flush_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

fn record_set(tag: &str, message: &str) -> RecordSet {
    let mut fields = BTreeMap::new();
    fields.insert("message".to_string(), json!(message));
    RecordSet::new(tag, vec![Record::new(1_700_000_000, fields)])
}

#[cfg(test)]
#[tokio::test]
async fn output_ships_records_on_shutdown() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", Matcher::Regex(IMPORT_PATH.to_string()))
        .match_header("Authorization", "TD1 mock-api-key")
        .match_header("Content-Type", "application/octet-stream")
        .with_status(200)
        .with_body(r#"{"database":"app","table":"web","unique_id":"x","elapsed_time":0.01}"#)
        .expect(1)
        .create_async()
        .await;

    let output = Output::from_config(&config(&server), &MemoryJournalGroupFactory::new(1 << 20))
        .expect("failed to create output");
    output.start().expect("failed to start output");
    output
        .emit(vec![record_set("app.web", "a"), record_set("App.Web", "b")])
        .await;
    output.stop();

    timeout(Duration::from_secs(10), output.wait_for_shutdown())
        .await
        .expect("output did not shut down");
    assert_eq!(output.spooler_count(), 1);
    mock.assert_async().await;
}

#[cfg(test)]
#[tokio::test]
async fn failed_import_is_retried_on_next_tick() {
    let mut server = Server::new_async().await;
    let failure = server
        .mock("PUT", Matcher::Regex(IMPORT_PATH.to_string()))
        .with_status(500)
        .with_body("Internal Server Error")
        .expect(1)
        .create_async()
        .await;
    let success = server
        .mock("PUT", Matcher::Regex(IMPORT_PATH.to_string()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = config(&server);
    let importer: Arc<dyn BulkImporter> =
        Arc::new(HttpImporter::new(&config).expect("failed to create importer"));
    let journal = Arc::new(MemoryJournal::new("app.web", 1 << 20, 1));
    let mut payload = Vec::new();
    encode_records(&mut payload, &record_set("app.web", "a").records).expect("encode");
    journal.write(&payload).expect("write");

    let settings = SpoolerSettings {
        flush_interval: Duration::from_millis(50),
        flush_on_shutdown: false,
        blob: BlobOptions::default(),
    };
    let destination = DestinationKey {
        namespace: "app".to_string(),
        relation: "web".to_string(),
    };
    let spooler = Arc::new(Spooler::new(
        destination,
        journal.clone(),
        importer,
        &settings,
    ));
    let task = tokio::spawn(Arc::clone(&spooler).run());

    timeout(Duration::from_secs(10), async {
        while journal.pending_chunks() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("chunk was never imported");

    assert!(spooler.flush_count() >= 2);
    spooler.begin_shutdown();
    task.await.expect("spooler task failed");
    assert!(journal.is_disposed());
    failure.assert_async().await;
    success.assert_async().await;
}

#[cfg(test)]
#[tokio::test]
async fn http_importer_surfaces_rejections() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", "/v3/table/import_with_id/app/web/0123/msgpack.gz")
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;

    let importer = HttpImporter::new(&config(&server)).expect("failed to create importer");
    let blob = CompressedBlob::compress(&mut &b"data"[..], &BlobOptions::default())
        .expect("compress");
    let err = importer
        .import("app", "web", td_output::IMPORT_FORMAT, blob, "0123")
        .await
        .expect_err("import should fail");

    match err {
        ImportError::Destination(Some(status), body) => {
            assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
            assert_eq!(body, "forbidden");
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_async().await;
}

#[cfg(test)]
#[tokio::test]
async fn fixed_destination_overrides_tag() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock(
            "PUT",
            Matcher::Regex(r"^/v3/table/import_with_id/logs/access/[0-9a-f]{32}/msgpack\.gz$".into()),
        )
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = OutputConfig {
        database_name: DestinationPattern::parse("logs"),
        table_name: DestinationPattern::parse("access"),
        journal_group_path: PathBuf::from("/unused"),
        ..config(&server)
    };
    let output = Output::from_config(&config, &MemoryJournalGroupFactory::new(1 << 20))
        .expect("failed to create output");
    output.start().expect("failed to start output");
    output
        .emit(vec![record_set("app.web", "a"), record_set("other", "b")])
        .await;
    output.stop();
    timeout(Duration::from_secs(10), output.wait_for_shutdown())
        .await
        .expect("output did not shut down");

    assert_eq!(output.spooler_count(), 1);
    mock.assert_async().await;
}

struct Import {
    namespace: String,
    relation: String,
    unique_id: String,
    records: Vec<Value>,
}

/// Decodes every uploaded blob back into records.
#[derive(Default)]
struct DecodingImporter {
    imports: Mutex<Vec<Import>>,
}

#[async_trait]
impl BulkImporter for DecodingImporter {
    async fn import(
        &self,
        namespace: &str,
        relation: &str,
        format: &str,
        blob: CompressedBlob,
        unique_id: &str,
    ) -> Result<ImportResult, ImportError> {
        assert_eq!(format, td_output::IMPORT_FORMAT);
        let compressed = blob.into_bytes().expect("blob bytes");
        let mut payload = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut payload)
            .expect("gzip payload");
        let records = decode_records(&payload).expect("msgpack payload");
        self.imports.lock().unwrap().push(Import {
            namespace: namespace.to_string(),
            relation: relation.to_string(),
            unique_id: unique_id.to_string(),
            records,
        });
        Ok(ImportResult::default())
    }
}

#[cfg(test)]
#[tokio::test]
async fn output_imports_records_after_one_flush_interval() {
    let importer = Arc::new(DecodingImporter::default());
    let config = OutputConfig {
        flush_interval: Duration::from_millis(50),
        flush_on_shutdown: false,
        ..Default::default()
    };
    let output = Output::new(&config, importer.clone(), &MemoryJournalGroupFactory::new(1 << 20))
        .expect("failed to create output");
    output.start().expect("failed to start output");
    output.emit(vec![record_set("app.web", "a")]).await;

    timeout(Duration::from_secs(5), async {
        while importer.imports.lock().unwrap().is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("nothing was imported");
    // a few more ticks with an empty journal must not produce imports
    sleep(Duration::from_millis(150)).await;

    {
        let imports = importer.imports.lock().unwrap();
        assert_eq!(imports.len(), 1);
        let import = &imports[0];
        assert_eq!(import.namespace, "app");
        assert_eq!(import.relation, "web");
        assert_eq!(import.unique_id.len(), 32);
        assert_eq!(
            import.records,
            vec![json!({"time": 1_700_000_000, "message": "a"})]
        );
    }

    output.stop();
    timeout(Duration::from_secs(5), output.wait_for_shutdown())
        .await
        .expect("output did not shut down");
    assert_eq!(importer.imports.lock().unwrap().len(), 1);
}
