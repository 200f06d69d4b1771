use crate::types::{LifecycleMessage, SubmissionRequest, SubmissionState};
use redis::{AsyncCommands, RedisResult};

/// Redis key layout shared by the engine and anything feeding it.
/// Keeps producers and engine instances from drifting apart on key names.

pub const SUBMISSION_QUEUE: &str = "arbiter:queue:submissions";
pub const CLAIM_PREFIX: &str = "arbiter:claim";
pub const MESSAGES_PREFIX: &str = "arbiter:messages";
pub const STATUS_PREFIX: &str = "arbiter:status";
pub const RESULT_PREFIX: &str = "arbiter:result";
pub const EVENTS_CHANNEL: &str = "arbiter:events";

/// Retention for per-submission keys (24 hours)
const RETENTION_SECS: u64 = 86400;

pub fn claim_key(submission_id: &str) -> String {
    format!("{}:{}", CLAIM_PREFIX, submission_id)
}

pub fn messages_key(submission_id: &str) -> String {
    format!("{}:{}", MESSAGES_PREFIX, submission_id)
}

pub fn status_key(submission_id: &str) -> String {
    format!("{}:{}", STATUS_PREFIX, submission_id)
}

pub fn result_key(submission_id: &str) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

fn encode<T: serde::Serialize>(value: &T) -> RedisResult<String> {
    serde_json::to_string(value)
        .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string())))
}

fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> RedisResult<T> {
    serde_json::from_str(payload)
        .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string())))
}

/// Push a submission onto the shared queue (RPUSH, FIFO with `pop_submission`)
pub async fn push_submission(
    conn: &mut redis::aio::ConnectionManager,
    request: &SubmissionRequest,
) -> RedisResult<()> {
    let payload = encode(request)?;
    conn.rpush(SUBMISSION_QUEUE, payload).await
}

/// Pop the next submission, blocking up to `timeout_seconds`
pub async fn pop_submission(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<SubmissionRequest>> {
    let result: Option<(String, String)> = conn.blpop(SUBMISSION_QUEUE, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => Ok(Some(decode(&payload)?)),
        None => Ok(None),
    }
}

/// Claim a submission for one engine instance.
///
/// Returns `false` when a different instance already holds the claim. A
/// claim already held by `owner` counts as success so redelivery to the
/// same instance is not rejected.
pub async fn claim_submission(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &str,
    owner: &str,
) -> RedisResult<bool> {
    let key = claim_key(submission_id);
    let set: Option<String> = redis::cmd("SET")
        .arg(&key)
        .arg(owner)
        .arg("NX")
        .arg("EX")
        .arg(RETENTION_SECS)
        .query_async(conn)
        .await?;

    if set.is_some() {
        return Ok(true);
    }

    let holder: Option<String> = conn.get(&key).await?;
    Ok(holder.as_deref() == Some(owner))
}

/// Drop a claim held by `owner`; a claim held by anyone else is left alone
pub async fn release_claim(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &str,
    owner: &str,
) -> RedisResult<bool> {
    let released: i64 = redis::Script::new(
        r"if redis.call('GET', KEYS[1]) == ARGV[1] then return redis.call('DEL', KEYS[1]) else return 0 end",
    )
    .key(claim_key(submission_id))
    .arg(owner)
    .invoke_async(conn)
    .await?;
    Ok(released == 1)
}

/// Record one lifecycle message.
///
/// The message is appended to the submission's message list and published
/// on the events channel; messages that change durable state also update
/// the status key, and `done` stores the score.
pub async fn record_message(
    conn: &mut redis::aio::ConnectionManager,
    message: &LifecycleMessage,
) -> RedisResult<()> {
    let payload = encode(message)?;
    let mut pipe = redis::pipe();
    pipe.atomic();

    let messages = messages_key(&message.id);
    pipe.rpush(&messages, &payload).ignore();
    pipe.cmd("EXPIRE").arg(&messages).arg(RETENTION_SECS).ignore();
    pipe.publish(EVENTS_CHANNEL, &payload).ignore();

    if let Some(state) = message.event.submission_state() {
        pipe.cmd("SET")
            .arg(status_key(&message.id))
            .arg(encode(&state)?)
            .arg("EX")
            .arg(RETENTION_SECS)
            .ignore();
    }

    if let Some(score) = message.event.recorded_score() {
        pipe.cmd("SET")
            .arg(result_key(&message.id))
            .arg(score)
            .arg("EX")
            .arg(RETENTION_SECS)
            .ignore();
    }

    pipe.query_async(conn).await
}

/// Retrieve the durable state of a submission
pub async fn get_status(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &str,
) -> RedisResult<Option<SubmissionState>> {
    let payload: Option<String> = conn.get(status_key(submission_id)).await?;
    payload.as_deref().map(decode::<SubmissionState>).transpose()
}

/// Retrieve every message recorded for a submission, in emission order
pub async fn get_messages(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &str,
) -> RedisResult<Vec<LifecycleMessage>> {
    let payloads: Vec<String> = conn.lrange(messages_key(submission_id), 0, -1).await?;
    payloads.iter().map(|p| decode(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_naming() {
        assert_eq!(claim_key("abc"), "arbiter:claim:abc");
        assert_eq!(messages_key("abc"), "arbiter:messages:abc");
        assert_eq!(status_key("abc"), "arbiter:status:abc");
        assert_eq!(result_key("abc"), "arbiter:result:abc");
    }

    #[test]
    fn test_keys_deterministic() {
        assert_eq!(status_key("x1"), status_key("x1"));
        assert_ne!(status_key("x1"), status_key("x2"));
    }
}
