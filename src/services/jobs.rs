// SPDX-License-Identifier: MIT

//! Durable job queue over hot-store lists.
//!
//! `enqueue` LPUSHes an envelope onto `jobs:{topic}`; workers RPOP, so each
//! topic is FIFO. Delivery is at-least-once and consumers are expected to be
//! idempotent. A job that keeps failing is retried with exponential backoff
//! (base 1 s) until its attempts are exhausted, then moved to
//! `jobs:{topic}:dead` for operator inspection.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{keys, HotCache};
use crate::error::{AppError, Result};

/// Topic consumed by the ping persister.
pub const TOPIC_LOCATION_PINGS: &str = "location-pings";
/// Topic for cross-cutting post-send work (push notifications, analytics).
pub const TOPIC_CHAT_AFTER_WRITE: &str = "chat-after-write";

/// Default attempt budget before a job dead-letters.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base of the exponential retry backoff.
pub const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// A queued unit of work. Retry state travels with the payload so it
/// survives a node crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub attempts: u32,
    pub max_attempts: u32,
    pub payload: Value,
}

impl JobEnvelope {
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            payload,
        }
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| AppError::Validation(format!("job payload: {}", e)))
    }

    /// Record a failed attempt. Returns true while the job still has
    /// attempts left.
    pub fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        self.attempts < self.max_attempts
    }

    /// Delay before the next attempt: base * 2^(attempts-1).
    pub fn backoff(&self) -> Duration {
        let exponent = self.attempts.saturating_sub(1).min(16);
        RETRY_BACKOFF_BASE * 2u32.pow(exponent)
    }
}

/// What happened to a failed job.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDisposition {
    Requeued,
    DeadLettered,
}

/// Shared queue handle. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    hot: HotCache,
}

impl JobQueue {
    pub fn new(hot: HotCache) -> Self {
        Self { hot }
    }

    /// Enqueue a payload under a topic. Returns the job id.
    pub async fn enqueue<T: Serialize>(&self, topic: &str, payload: &T) -> Result<Uuid> {
        let envelope = JobEnvelope::new(
            serde_json::to_value(payload).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?,
        );
        let id = envelope.id;
        self.push(topic, &envelope).await?;
        Ok(id)
    }

    /// Pop the oldest job for a topic, if any.
    pub async fn pop(&self, topic: &str) -> Result<Option<JobEnvelope>> {
        let raw = self.hot.rpop(&keys::job_queue(topic)).await?;
        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(envelope) => Ok(Some(envelope)),
                Err(e) => {
                    // An unreadable envelope can never succeed; park it for
                    // the operator instead of looping on it.
                    tracing::error!(error = %e, topic = %topic, "Unreadable job envelope; dead-lettering");
                    self.hot.lpush(&keys::job_dead_letter(topic), &raw).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Record a failure and either requeue the job or dead-letter it.
    pub async fn retry_or_dead_letter(
        &self,
        topic: &str,
        mut job: JobEnvelope,
    ) -> Result<RetryDisposition> {
        if job.record_failure() {
            self.push(topic, &job).await?;
            Ok(RetryDisposition::Requeued)
        } else {
            self.dead_letter(topic, &job).await?;
            Ok(RetryDisposition::DeadLettered)
        }
    }

    /// Park a job on the topic's dead-letter list.
    pub async fn dead_letter(&self, topic: &str, job: &JobEnvelope) -> Result<()> {
        tracing::warn!(
            job_id = %job.id,
            topic = %topic,
            attempts = job.attempts,
            "Dead-lettering job"
        );
        let raw =
            serde_json::to_string(job).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        self.hot.lpush(&keys::job_dead_letter(topic), &raw).await
    }

    pub async fn depth(&self, topic: &str) -> Result<u64> {
        self.hot.llen(&keys::job_queue(topic)).await
    }

    async fn push(&self, topic: &str, envelope: &JobEnvelope) -> Result<()> {
        let raw =
            serde_json::to_string(envelope).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        self.hot.lpush(&keys::job_queue(topic), &raw).await
    }
}

/// Payload of the chat after-write topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfterWritePayload {
    pub message_id: Uuid,
    pub room_id: String,
}

/// Consume the after-write topic. The hook is a structured-logging no-op in
/// this deployment; push notifications and analytics attach here.
pub async fn run_after_write_worker(queue: JobQueue) {
    tracing::info!("After-write worker running");
    loop {
        match queue.pop(TOPIC_CHAT_AFTER_WRITE).await {
            Ok(Some(job)) => match job.payload_as::<AfterWritePayload>() {
                Ok(payload) => {
                    tracing::debug!(
                        message_id = %payload.message_id,
                        room_id = %payload.room_id,
                        "After-write hook"
                    );
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Bad after-write payload");
                    let _ = queue
                        .retry_or_dead_letter(TOPIC_CHAT_AFTER_WRITE, job)
                        .await;
                }
            },
            Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
            Err(e) => {
                tracing::error!(error = %e, "After-write worker queue error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = JobEnvelope::new(json!({ "sessionId": "s1", "lat": 39.6 }));
        let raw = serde_json::to_string(&envelope).unwrap();
        let back: JobEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, envelope.id);
        assert_eq!(back.attempts, 0);
        assert_eq!(back.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_three_attempts_then_exhausted() {
        let mut job = JobEnvelope::new(json!({}));
        assert!(job.record_failure()); // attempt 1
        assert!(job.record_failure()); // attempt 2
        assert!(!job.record_failure()); // attempt 3: budget spent
    }

    #[test]
    fn test_backoff_doubles_from_one_second() {
        let mut job = JobEnvelope::new(json!({}));
        job.record_failure();
        assert_eq!(job.backoff(), Duration::from_secs(1));
        job.record_failure();
        assert_eq!(job.backoff(), Duration::from_secs(2));
        job.record_failure();
        assert_eq!(job.backoff(), Duration::from_secs(4));
    }

    #[test]
    fn test_payload_typing() {
        let payload = AfterWritePayload {
            message_id: Uuid::new_v4(),
            room_id: "group:g1".to_string(),
        };
        let job = JobEnvelope::new(serde_json::to_value(&payload).unwrap());
        let back: AfterWritePayload = job.payload_as().unwrap();
        assert_eq!(back.message_id, payload.message_id);

        let bad: Result<AfterWritePayload> = JobEnvelope::new(json!({ "nope": 1 })).payload_as();
        assert!(bad.is_err());
    }
}
