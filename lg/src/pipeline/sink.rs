//! Output writers, one JSON-lines file per channel

use std::path::Path;

use eyre::{Context, Result};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::Message;

pub const SUBMITTED_FILE: &str = "submitted.jsonl";
pub const RETRY_FILE: &str = "retry.jsonl";
pub const DEAD_LETTER_FILE: &str = "dead-letter.jsonl";

/// Write each message as one JSON line until the channel closes
pub async fn write_messages(rx: mpsc::Receiver<Message>, path: &Path) -> Result<usize> {
    write_lines(rx, path, |message| {
        serde_json::to_string(message).context("Failed to encode message")
    })
    .await
}

/// Write dead-letter records until the channel closes
///
/// Records that are already single-line JSON are written verbatim; anything
/// else (an unreadable payload) is written as a JSON string.
pub async fn write_dead_letters(rx: mpsc::Receiver<String>, path: &Path) -> Result<usize> {
    write_lines(rx, path, |record| Ok(dead_letter_line(record))).await
}

fn dead_letter_line(record: &str) -> String {
    let is_json_line = !record.contains('\n') && serde_json::from_str::<serde_json::Value>(record).is_ok();
    if is_json_line {
        record.to_string()
    } else {
        serde_json::Value::String(record.to_string()).to_string()
    }
}

async fn write_lines<T, F>(mut rx: mpsc::Receiver<T>, path: &Path, encode: F) -> Result<usize>
where
    F: Fn(&T) -> Result<String>,
{
    debug!(path = %path.display(), "write_lines: called");
    let file = tokio::fs::File::create(path)
        .await
        .context(format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;

    while let Some(item) = rx.recv().await {
        let mut line = encode(&item)?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .context(format!("Failed to write {}", path.display()))?;
        count += 1;
    }

    writer.flush().await.context(format!("Failed to flush {}", path.display()))?;
    debug!(path = %path.display(), count, "write_lines: channel closed");
    Ok(count)
}
