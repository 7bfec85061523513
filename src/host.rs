// src/host.rs - host input feeding the controller
//! Lines read from the host go to the controller over a channel, which may
//! be several lines behind. Real-time characters are taken out as they are
//! read, so a feedhold acts while earlier lines are still queued.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::machine::MachineRequests;

/// Forward `reader` line by line until it ends or the receiver goes away.
pub async fn forward_lines<R: AsyncBufRead + Unpin>(
    reader: R,
    tx: mpsc::Sender<String>,
    requests: Arc<MachineRequests>,
) -> std::io::Result<()> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let kept: String = line.chars().filter(|c| !requests.intercept(*c)).collect();
        if kept.trim().is_empty() {
            continue;
        }
        if tx.send(kept).await.is_err() {
            tracing::debug!("Controller gone, stopping input");
            break;
        }
    }
    Ok(())
}
