//! Background persister for the ping stream.
//!
//! Drains the `location-pings` topic into an in-process buffer and flushes
//! when the buffer reaches the batch size OR the flush interval has elapsed
//! with a non-empty buffer, whichever comes first. Each flush is one
//! transaction: a multi-row insert plus one aggregate update per session. A
//! failed flush returns the batch to the head of the buffer; jobs that keep
//! failing dead-letter individually.
//!
//! Distance is integrated per batch only. Joining across batches (using the
//! previous batch's last ping) is deliberately not done, so the integral is
//! a lower bound; a "last processed ping per session" record could tighten
//! it later without changing any external behavior.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::Config;
use crate::db::{SessionDelta, WarmDb};
use crate::error::Result;
use crate::geo::haversine_distance_m;
use crate::models::PingRecord;
use crate::services::jobs::{JobEnvelope, JobQueue, RETRY_BACKOFF_BASE, TOPIC_LOCATION_PINGS};

/// Idle poll interval when the queue is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Buffered {
    job: JobEnvelope,
    ping: PingRecord,
}

/// The persister worker. One per node; consumers are idempotent under the
/// queue's at-least-once delivery because re-inserted pings only fatten the
/// append-only stream and the aggregates stay monotonic.
pub struct PingPersister {
    warm: WarmDb,
    queue: JobQueue,
    batch_size: usize,
    flush_interval: Duration,
}

impl PingPersister {
    pub fn new(warm: WarmDb, queue: JobQueue, config: &Config) -> Self {
        Self {
            warm,
            queue,
            batch_size: config.batch_size,
            flush_interval: Duration::from_millis(config.batch_flush_ms),
        }
    }

    /// Run forever. Spawned as an independent task at startup.
    pub async fn run(self) {
        tracing::info!(
            batch_size = self.batch_size,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Ping persister running"
        );

        let mut buffer: VecDeque<Buffered> = VecDeque::new();
        let mut last_flush = Instant::now();

        loop {
            let drained = self.drain_queue(&mut buffer).await;

            let size_due = buffer.len() >= self.batch_size;
            let time_due = !buffer.is_empty() && last_flush.elapsed() >= self.flush_interval;

            if size_due || time_due {
                let take = self.batch_size.min(buffer.len());
                let batch: Vec<Buffered> = buffer.drain(..take).collect();
                last_flush = Instant::now();

                match self.flush(&batch).await {
                    Ok(()) => {
                        tracing::debug!(count = batch.len(), "Flushed ping batch");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, count = batch.len(), "Ping batch flush failed");
                        let backoff = self.return_to_buffer(&mut buffer, batch).await;
                        tokio::time::sleep(backoff).await;
                    }
                }
            } else if drained == 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// Pull pending jobs into the buffer, up to one batch beyond what is
    /// already waiting. Returns how many jobs were taken.
    async fn drain_queue(&self, buffer: &mut VecDeque<Buffered>) -> usize {
        let mut taken = 0;
        while buffer.len() < self.batch_size {
            match self.queue.pop(TOPIC_LOCATION_PINGS).await {
                Ok(Some(job)) => match job.payload_as::<PingRecord>() {
                    Ok(ping) => {
                        buffer.push_back(Buffered { job, ping });
                        taken += 1;
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, error = %e, "Undecodable ping job");
                        let _ = self.queue.dead_letter(TOPIC_LOCATION_PINGS, &job).await;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Ping queue pop failed");
                    break;
                }
            }
        }
        taken
    }

    async fn flush(&self, batch: &[Buffered]) -> Result<()> {
        let records: Vec<PingRecord> = batch.iter().map(|b| b.ping.clone()).collect();
        let deltas = compute_session_deltas(&records);
        self.warm.persist_ping_batch(&records, &deltas).await
    }

    /// Put a failed batch back at the head of the buffer, spending one
    /// retry attempt per job and dead-lettering the exhausted ones. Returns
    /// the backoff to sleep before the next attempt.
    async fn return_to_buffer(
        &self,
        buffer: &mut VecDeque<Buffered>,
        batch: Vec<Buffered>,
    ) -> Duration {
        let mut backoff = RETRY_BACKOFF_BASE;
        for mut item in batch.into_iter().rev() {
            if item.job.record_failure() {
                backoff = backoff.max(item.job.backoff());
                buffer.push_front(item);
            } else {
                let _ = self
                    .queue
                    .dead_letter(TOPIC_LOCATION_PINGS, &item.job)
                    .await;
            }
        }
        backoff
    }
}

/// Group a batch by session and compute each session's aggregate delta,
/// iterating every group in capture-timestamp order so queue reordering
/// under retry cannot skew the integrals.
pub fn compute_session_deltas(records: &[PingRecord]) -> Vec<(Uuid, SessionDelta)> {
    let mut groups: BTreeMap<Uuid, Vec<&PingRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.session_id).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|(session_id, mut pings)| {
            pings.sort_by_key(|p| p.recorded_at);
            (session_id, session_delta(&pings))
        })
        .collect()
}

/// Aggregate delta for one session's pings, already in timestamp order:
/// haversine path distance, vertical descent (ascents contribute zero), and
/// the batch's maximum speed.
fn session_delta(pings: &[&PingRecord]) -> SessionDelta {
    let mut delta = SessionDelta::default();

    for pair in pings.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);
        delta.additional_distance_m +=
            haversine_distance_m(prev.lat, prev.lon, curr.lat, curr.lon);
        let drop = prev.altitude_m - curr.altitude_m;
        if drop > 0.0 {
            delta.vertical_descent_m += drop;
        }
    }

    delta.max_speed_mps = pings
        .iter()
        .map(|p| p.speed_mps)
        .fold(0.0_f64, f64::max);

    delta
}
