/// Submission source and sink
///
/// The engine pulls requests from a [`SubmissionSource`] and reports every
/// lifecycle message to a [`SubmissionSink`]. Production wiring is Redis:
/// the shared queue is the source, and the sink appends each message to
/// the submission's message list and publishes it.
use anyhow::{Context, Result};
use arbiter_common::redis;
use arbiter_common::types::{Lifecycle, LifecycleMessage, SubmissionRequest};
use async_trait::async_trait;
use tracing::{debug, info};

/// Seconds one BLPOP waits before the source loop gets a chance to stop
const POLL_TIMEOUT_SECS: f64 = 5.0;

#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// Deliver one message. `false` on the admission message means another
    /// engine instance owns the submission and it must be abandoned.
    async fn send(&self, message: LifecycleMessage) -> Result<bool>;

    /// Hand back a submission whose admission could not be recorded, so a
    /// later attempt can pick it up
    async fn requeue(&self, request: &SubmissionRequest) -> Result<()>;
}

#[async_trait]
pub trait SubmissionSource: Send {
    /// Next request, or `None` when nothing arrived within the poll window
    async fn next_submission(&mut self) -> Result<Option<SubmissionRequest>>;
}

#[derive(Clone)]
pub struct RedisInterface {
    conn: ::redis::aio::ConnectionManager,
    /// Identity used when claiming submissions
    owner: String,
}

impl RedisInterface {
    pub async fn connect(redis_url: &str, owner: impl Into<String>) -> Result<Self> {
        let client = ::redis::Client::open(redis_url).with_context(|| format!("invalid Redis URL {}", redis_url))?;
        let conn = ::redis::aio::ConnectionManager::new(client)
            .await
            .with_context(|| format!("failed to connect to Redis at {}", redis_url))?;

        Ok(Self {
            conn,
            owner: owner.into(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[async_trait]
impl SubmissionSink for RedisInterface {
    async fn send(&self, message: LifecycleMessage) -> Result<bool> {
        let mut conn = self.conn.clone();

        if message.event == Lifecycle::Executing {
            let claimed = redis::claim_submission(&mut conn, &message.id, &self.owner)
                .await
                .context("claiming submission")?;
            if !claimed {
                info!(submission_id = %message.id, "Submission claimed by another engine");
                return Ok(false);
            }
        }

        redis::record_message(&mut conn, &message)
            .await
            .with_context(|| format!("recording '{}' message", message.event.name()))?;
        debug!(submission_id = %message.id, state = message.event.name(), "Message recorded");
        Ok(true)
    }

    async fn requeue(&self, request: &SubmissionRequest) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::release_claim(&mut conn, &request.id, &self.owner)
            .await
            .context("releasing claim")?;
        redis::push_submission(&mut conn, request)
            .await
            .context("pushing submission back onto the queue")?;
        info!(submission_id = %request.id, "Submission returned to the queue");
        Ok(())
    }
}

#[async_trait]
impl SubmissionSource for RedisInterface {
    async fn next_submission(&mut self) -> Result<Option<SubmissionRequest>> {
        redis::pop_submission(&mut self.conn, POLL_TIMEOUT_SECS)
            .await
            .context("polling submission queue")
    }
}

/// Records every message in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    messages: std::sync::Mutex<Vec<LifecycleMessage>>,
    /// Answer `false` to admission, as if another engine held the claim
    decline_admission: bool,
    /// Admission attempts still to fail before one is recorded
    failing_admissions: std::sync::atomic::AtomicUsize,
    requeued: std::sync::Mutex<Vec<SubmissionRequest>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn declining() -> Self {
        Self {
            decline_admission: true,
            ..Default::default()
        }
    }

    /// Fail the first `attempts` admission messages with a transport error
    pub fn failing_admissions(attempts: usize) -> Self {
        Self {
            failing_admissions: attempts.into(),
            ..Default::default()
        }
    }

    pub fn requeued(&self) -> Vec<SubmissionRequest> {
        self.requeued.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<LifecycleMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Events recorded for one submission, in delivery order
    pub fn events_for(&self, submission_id: &str) -> Vec<Lifecycle> {
        self.messages()
            .into_iter()
            .filter(|m| m.id == submission_id)
            .map(|m| m.event)
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl SubmissionSink for MemorySink {
    async fn send(&self, message: LifecycleMessage) -> Result<bool> {
        use std::sync::atomic::Ordering;

        let admission = message.event == Lifecycle::Executing;
        if admission
            && self
                .failing_admissions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            anyhow::bail!("connection reset");
        }
        self.messages.lock().unwrap().push(message);
        Ok(!(admission && self.decline_admission))
    }

    async fn requeue(&self, request: &SubmissionRequest) -> Result<()> {
        self.requeued.lock().unwrap().push(request.clone());
        Ok(())
    }
}
