//! Feed recorded JSON-lines readings onto the bus.
//!
//! Lines are published verbatim; decoding is the detection engine's job, so
//! a bad line is skipped there like any other malformed reading.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::touch_freshness;
use crate::bus::{Publisher, READINGS};
use crate::storage::MarkerStore;

/// Publish every non-blank line of `reader`. Returns how many were sent.
pub async fn publish_lines<R>(
    reader: R,
    publisher: Arc<dyn Publisher>,
    markers: Arc<dyn MarkerStore>,
    cancel: CancellationToken,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("failed to read input")?,
        };
        let Some(line) = line else { break };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        publisher
            .publish(READINGS, line.to_string())
            .context("failed to publish reading")?;
        sent += 1;
        if let Err(e) = touch_freshness(markers.as_ref()) {
            warn!(error = %e, "Failed to update freshness marker");
        }
    }

    info!(sent, "Finished publishing input readings");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::storage::MemoryMarkers;

    #[tokio::test]
    async fn test_publishes_each_line_verbatim() {
        let bus = Bus::new(16);
        let mut readings = bus.subscribe(READINGS).unwrap();
        let input: &[u8] = b"{\"a\":1}\n\n   \nnot json\n";

        let sent = publish_lines(
            input,
            Arc::new(bus.clone()),
            Arc::new(MemoryMarkers::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(sent, 2);
        assert_eq!(readings.recv().await.unwrap(), "{\"a\":1}");
        assert_eq!(readings.recv().await.unwrap(), "not json");
    }
}
