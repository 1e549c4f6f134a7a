//! Inbound message reader

use std::path::Path;

use eyre::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::Message;

/// Open a file for reading, or stdin for `-`
pub async fn open_input(path: &Path) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    debug!(path = %path.display(), "open_input: called");
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .context(format!("Failed to open input {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Forward every non-blank line as a message; returns the number sent
pub async fn read_messages<R>(reader: R, tx: mpsc::Sender<Message>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await.context("Failed to read input line")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tx.send(Message::parse_line(line))
            .await
            .map_err(|_| eyre::eyre!("Inbound channel closed"))?;
        count += 1;
    }
    debug!(count, "read_messages: input drained");
    Ok(count)
}
