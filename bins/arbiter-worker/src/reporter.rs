// Per-submission message channel: events go out in emission order through one sender task
use crate::interface::SubmissionSink;
use arbiter_common::types::{Lifecycle, LifecycleMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub struct Reporter {
    submission_id: String,
    tx: mpsc::UnboundedSender<LifecycleMessage>,
    sender: JoinHandle<()>,
}

impl Reporter {
    pub fn spawn(submission_id: impl Into<String>, sink: Arc<dyn SubmissionSink>) -> Self {
        let submission_id = submission_id.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<LifecycleMessage>();

        let sender = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let state = message.event.name();
                match sink.send(message).await {
                    Ok(true) => {}
                    Ok(false) => debug!(state, "Sink declined message"),
                    Err(e) => error!(state, error = %e, "Failed to deliver lifecycle message"),
                }
            }
        });

        Self {
            submission_id,
            tx,
            sender,
        }
    }

    /// Queue one event; it is stamped with the current judge time
    pub fn emit(&self, event: Lifecycle) {
        debug!(submission_id = %self.submission_id, state = event.name(), "Lifecycle event");
        let message = LifecycleMessage::new(self.submission_id.clone(), event);
        if self.tx.send(message).is_err() {
            warn!(submission_id = %self.submission_id, "Lifecycle sender already stopped");
        }
    }

    /// Close the channel and wait until every queued message was handed to the sink
    pub async fn finish(self) {
        let Reporter { submission_id, tx, sender } = self;
        drop(tx);
        if let Err(e) = sender.await {
            error!(submission_id = %submission_id, error = %e, "Lifecycle sender task failed");
        }
    }
}
