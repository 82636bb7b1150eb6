//! One-shot subcommands: `ingest` and `dead-letters`.
//!
//! Both commands open the configured backends directly and exit once
//! their output is written. Neither starts the worker or the evaluator.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use logsluice_core::config::LogsluiceConfig;
use logsluice_core::types::EntryId;
use logsluice_ingest::{DeadLetterEntry, IngestReceipt};

use crate::modules::Backends;

/// Submit a JSON / NDJSON file through the ingest gateway.
///
/// Returns the receipt after writing it as one JSON line to `out`.
pub async fn ingest(
    config: &LogsluiceConfig,
    path: &Path,
    out: &mut impl Write,
) -> Result<IngestReceipt> {
    require_shared_queue(config, "ingest")?;
    require_shared_store(config, "ingest")?;

    let body = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;

    let backends = Backends::open(config)?;
    let receipt = backends
        .gateway()
        .submit_body(&body)
        .await
        .map_err(|e| anyhow::anyhow!("ingest of {} failed: {}", path.display(), e))?;

    tracing::info!(
        file = %path.display(),
        accepted = receipt.accepted,
        path = receipt.path.as_str(),
        "file ingested"
    );

    serde_json::to_writer(&mut *out, &receipt)?;
    writeln!(out)?;
    Ok(receipt)
}

/// One dead-letter entry as printed by the `dead-letters` subcommand.
#[derive(Debug, Serialize)]
struct DeadLetterLine<'a> {
    /// Id of the dead-letter entry itself.
    id: EntryId,
    #[serde(flatten)]
    entry: &'a DeadLetterEntry,
}

/// Print up to `limit` dead-letter entries as JSON lines.
///
/// Returns the number of entries written.
pub async fn dead_letters(
    config: &LogsluiceConfig,
    limit: usize,
    out: &mut impl Write,
) -> Result<usize> {
    require_shared_queue(config, "dead-letters")?;

    let backends = Backends::open(config)?;
    let sink = backends.dead_letter_sink();

    let mut written = 0;
    let mut after: Option<EntryId> = None;
    while written < limit {
        let page = sink
            .list(after, (limit - written).min(DEAD_LETTER_PAGE))
            .await
            .map_err(|e| anyhow::anyhow!("failed to read dead letters: {}", e))?;
        let Some((last_id, _)) = page.last() else {
            break;
        };
        after = Some(*last_id);

        for (id, entry) in &page {
            serde_json::to_writer(&mut *out, &DeadLetterLine { id: *id, entry })?;
            writeln!(out)?;
            written += 1;
        }
    }

    tracing::debug!(written = written, stream = %sink.name(), "dead letters listed");
    Ok(written)
}

const DEAD_LETTER_PAGE: usize = 500;

/// The memory queue lives only inside one process, so one-shot commands
/// would enqueue into (or read from) a queue nothing else can see.
fn require_shared_queue(config: &LogsluiceConfig, command: &str) -> Result<()> {
    if config.queue.backend == "memory" {
        return Err(anyhow::anyhow!(
            "'{}' needs a shared queue backend; queue.backend = \"memory\" is process-local",
            command
        ));
    }
    Ok(())
}

/// A direct-path fallback into the memory store would report records as
/// accepted and then drop them when the command exits.
fn require_shared_store(config: &LogsluiceConfig, command: &str) -> Result<()> {
    if config.store.backend == "memory" {
        return Err(anyhow::anyhow!(
            "'{}' needs a durable store backend; store.backend = \"memory\" is process-local",
            command
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_queue_is_rejected() {
        let mut config = LogsluiceConfig::default();
        config.queue.backend = "memory".to_owned();
        let mut out = Vec::new();

        let err = dead_letters(&config, 10, &mut out).await.unwrap_err();
        assert!(err.to_string().contains("process-local"));

        let err = ingest(&config, Path::new("missing.json"), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("process-local"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn ingest_falls_back_to_direct_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("batch.ndjson");
        std::fs::write(
            &file,
            "{\"level\":\"INFO\",\"message\":\"a\",\"service\":\"api\",\"app\":\"demo\"}\n\
             {\"level\":\"ERROR\",\"message\":\"b\",\"service\":\"api\",\"app\":\"demo\"}\n",
        )
        .unwrap();

        let mut config = LogsluiceConfig::default();
        config.queue.redis_url = "redis://127.0.0.1:1/".to_owned();
        config.store.sqlite_path = dir.path().join("logs.db").display().to_string();

        let mut out = Vec::new();
        let receipt = ingest(&config, &file, &mut out).await.unwrap();
        assert_eq!(receipt.accepted, 2);

        let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["accepted"], 2);
        assert_eq!(printed["path"], "direct");
    }

    #[tokio::test]
    async fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.json");
        std::fs::write(&file, "[{\"message\": ").unwrap();

        let mut config = LogsluiceConfig::default();
        config.queue.redis_url = "redis://127.0.0.1:1/".to_owned();
        config.store.sqlite_path = dir.path().join("logs.db").display().to_string();

        let mut out = Vec::new();
        let err = ingest(&config, &file, &mut out).await.unwrap_err();
        assert!(!err.to_string().contains("process-local"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn memory_store_is_rejected_for_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("batch.json");
        std::fs::write(
            &file,
            "[{\"level\":\"INFO\",\"message\":\"a\",\"service\":\"api\",\"app\":\"demo\"}]",
        )
        .unwrap();

        let mut config = LogsluiceConfig::default();
        config.queue.redis_url = "redis://127.0.0.1:1/".to_owned();
        config.store.backend = "memory".to_owned();

        let mut out = Vec::new();
        let err = ingest(&config, &file, &mut out).await.unwrap_err();
        assert!(err.to_string().contains("durable store"));
        assert!(out.is_empty());
    }
}
