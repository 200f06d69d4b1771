/// Admission Queue - bounds how many submissions execute at once
///
/// **Slot Rules:**
/// - A submission starts immediately while fewer than `limit` are executing
/// - Otherwise it waits in FIFO order
/// - When an execution finishes, its task keeps the slot and takes the head
///   of the waiting list; the slot is released only when the list is empty
/// - All slot accounting happens under one lock, so completions racing each
///   other never promote the same request twice
use arbiter_common::types::SubmissionRequest;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info};

/// One unit of work per admitted submission
#[async_trait]
pub trait SubmissionRunner: Send + Sync + 'static {
    async fn run(&self, request: SubmissionRequest);

    /// Report the terminal error for a run that died before reporting its own
    async fn abort(&self, submission_id: &str, reason: String);
}

#[derive(Debug, Default)]
struct Slots {
    in_flight: usize,
    waiting: VecDeque<SubmissionRequest>,
}

struct Shared<R> {
    runner: Arc<R>,
    limit: usize,
    slots: Mutex<Slots>,
    idle: Notify,
}

pub struct Controller<R: SubmissionRunner> {
    shared: Arc<Shared<R>>,
}

impl<R: SubmissionRunner> Controller<R> {
    pub fn new(runner: R, limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                runner: Arc::new(runner),
                limit: limit.max(1),
                slots: Mutex::new(Slots::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Start the request now if a slot is free, otherwise queue it
    pub async fn submit(&self, request: SubmissionRequest) {
        let mut slots = self.shared.slots.lock().await;
        if slots.in_flight < self.shared.limit {
            slots.in_flight += 1;
            debug!(submission_id = %request.id, in_flight = slots.in_flight, "Slot granted");
            drop(slots);
            tokio::spawn(occupy_slot(self.shared.clone(), request));
        } else {
            info!(
                submission_id = %request.id,
                position = slots.waiting.len() + 1,
                "All slots busy, submission queued"
            );
            slots.waiting.push_back(request);
        }
    }

    pub async fn in_flight(&self) -> usize {
        self.shared.slots.lock().await.in_flight
    }

    pub async fn queued(&self) -> usize {
        self.shared.slots.lock().await.waiting.len()
    }

    /// Wait until nothing is executing and nothing is queued
    pub async fn drain(&self) {
        loop {
            let idle = self.shared.idle.notified();
            {
                let slots = self.shared.slots.lock().await;
                if slots.in_flight == 0 && slots.waiting.is_empty() {
                    return;
                }
                debug!(in_flight = slots.in_flight, queued = slots.waiting.len(), "Draining");
            }
            idle.await;
        }
    }
}

/// Execute requests on one slot until the waiting list is empty
async fn occupy_slot<R: SubmissionRunner>(shared: Arc<Shared<R>>, mut request: SubmissionRequest) {
    loop {
        let runner = shared.runner.clone();
        let id = request.id.clone();
        // a panicking execution must not leak its slot
        if let Err(e) = tokio::spawn(async move { runner.run(request).await }).await {
            error!(submission_id = %id, error = %e, "Execution task failed");
            shared.runner.abort(&id, format!("execution task failed: {}", e)).await;
        }

        let mut slots = shared.slots.lock().await;
        match slots.waiting.pop_front() {
            Some(next) => {
                debug!(submission_id = %next.id, queued = slots.waiting.len(), "Promoted from queue");
                request = next;
            }
            None => {
                slots.in_flight -= 1;
                if slots.in_flight == 0 {
                    shared.idle.notify_waiters();
                }
                return;
            }
        }
    }
}
