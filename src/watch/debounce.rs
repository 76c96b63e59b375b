// src/watch/debounce.rs

//! Batch filesystem events that arrive close together.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::watch::classifier::ChangeEvent;

/// Upper bound on how long one batch can keep growing, as a multiple of the
/// quiet window.
const MAX_BATCH_WINDOWS: u32 = 10;

/// Wait for the next event, then keep collecting until `window` passes
/// without a new one (or the batch has been open for ten windows).
///
/// Events keep their arrival order. Returns `None` once the channel is
/// closed and drained.
pub async fn next_batch(
    rx: &mut mpsc::UnboundedReceiver<ChangeEvent>,
    window: Duration,
) -> Option<Vec<ChangeEvent>> {
    let first = rx.recv().await?;
    let mut batch = vec![first];
    let deadline = Instant::now() + window * MAX_BATCH_WINDOWS;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match timeout(window.min(remaining), rx.recv()).await {
            Ok(Some(event)) => batch.push(event),
            Ok(None) | Err(_) => break,
        }
    }

    Some(batch)
}
