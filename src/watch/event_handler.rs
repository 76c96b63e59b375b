// src/watch/event_handler.rs

//! Turn raw change events into classified batches for the runtime.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::ConfigFile;
use crate::engine::RuntimeEvent;
use crate::watch::classifier::{ChangeClassifier, ChangeEvent};
use crate::watch::debounce::next_batch;

/// Consume change events until either channel closes.
///
/// Each debounced batch is classified against the most recently published
/// configuration; the classifier is rebuilt only when a new one arrives.
pub async fn classify_batches(
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    mut config_rx: watch::Receiver<Arc<ConfigFile>>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let mut classifier = ChangeClassifier::new(&config_rx.borrow_and_update());

    loop {
        let debounce = config_rx.borrow().config.debounce();
        let Some(batch) = next_batch(&mut events, debounce).await else {
            break;
        };

        if config_rx.has_changed().unwrap_or(false) {
            debug!("configuration changed; rebuilding change classifier");
            classifier = ChangeClassifier::new(&config_rx.borrow_and_update());
        }

        debug!(events = batch.len(), "processing change batch");
        let classification = classifier.classify(&batch);
        if classification.is_empty() {
            continue;
        }

        if let Err(err) = runtime_tx
            .send(RuntimeEvent::ChangesClassified(classification))
            .await
        {
            warn!("runtime channel closed; stopping change classification: {err}");
            break;
        }
    }

    debug!("change classification loop finished");
}
