//! Result delivery to caller callbacks.
//!
//! Completed results are pushed to the caller's callback URL on a bounded
//! retry schedule. Delivery is best-effort: after the schedule is
//! exhausted the result is marked failed but stays pollable until its
//! retention window lapses, so a caller with a broken receiver can still
//! collect the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use url::Url;

use tollgate::timestamp::UnixTimestamp;
use tollgate::types::AgentId;

/// Delivery knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delays between consecutive attempts. The first attempt fires
    /// immediately; the table's length is the attempt budget.
    pub retry_delays: Vec<Duration>,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
    /// How long a stored result stays pollable, counted from storage.
    pub retention: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_delays: vec![
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(60),
            ],
            timeout: Duration::from_secs(10),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Where a result is in its delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Delivery attempts are still scheduled.
    Pending,
    /// The callback acknowledged the result.
    Delivered,
    /// Every attempt failed; the result is poll-only now.
    Failed,
}

#[derive(Debug)]
struct DeliveryRecord {
    agent: AgentId,
    payload: Value,
    status: DeliveryStatus,
    attempts: u32,
    last_error: Option<String>,
    delivered_at: Option<UnixTimestamp>,
    created_at: Instant,
}

/// A pollable view of a stored result.
#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    /// The job the result belongs to.
    pub job_id: String,
    /// The caller the job was admitted for.
    pub agent: AgentId,
    /// Where delivery stands.
    pub status: DeliveryStatus,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// The result payload, as the processor produced it.
    pub data: Value,
    /// Last delivery failure, when any attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the callback acknowledged, for delivered results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<UnixTimestamp>,
}

/// Counters for the health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatchStats {
    /// Results currently held.
    pub stored: usize,
    /// Results with delivery still in flight.
    pub pending: usize,
    /// Results acknowledged by their callback.
    pub delivered: usize,
    /// Results whose delivery exhausted its schedule.
    pub failed: usize,
}

/// Stores completed results and pushes them to callbacks.
#[derive(Debug)]
pub struct ResultDispatcher {
    results: DashMap<String, DeliveryRecord>,
    http: reqwest::Client,
    config: DispatcherConfig,
}

impl ResultDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            results: DashMap::new(),
            http,
            config,
        }
    }

    /// Stores a completed result and spawns its delivery task. The stored
    /// copy is what polling returns, independent of delivery fate.
    pub fn store_and_deliver(
        self: &Arc<Self>,
        job_id: String,
        agent: AgentId,
        callback_url: Url,
        payload: Value,
    ) {
        self.results.insert(
            job_id.clone(),
            DeliveryRecord {
                agent,
                payload,
                status: DeliveryStatus::Pending,
                attempts: 0,
                last_error: None,
                delivered_at: None,
                created_at: Instant::now(),
            },
        );

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.deliver(&job_id, &callback_url).await;
        });
    }

    /// The first attempt fires immediately; each retry waits out the next
    /// entry of the delay table.
    async fn deliver(&self, job_id: &str, callback_url: &Url) {
        let schedule = self.config.retry_delays.clone();
        let mut last_error = String::new();

        for index in 0..schedule.len() {
            if index > 0 {
                tokio::time::sleep(schedule[index - 1]).await;
            }
            let attempt = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);

            let body = match self.results.get(job_id) {
                Some(record) => decorate(&record.payload, job_id, attempt),
                // Purged while we slept; nothing left to deliver.
                None => return,
            };

            match self.http.post(callback_url.clone()).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    if let Some(mut record) = self.results.get_mut(job_id) {
                        record.attempts = attempt;
                        record.status = DeliveryStatus::Delivered;
                        record.delivered_at = Some(UnixTimestamp::now());
                    }
                    tracing::info!(job_id, attempt, "callback delivered");
                    return;
                }
                Ok(response) => {
                    last_error = format!("callback returned {}", response.status());
                }
                Err(e) => {
                    last_error = format!("callback unreachable: {e}");
                }
            }

            if let Some(mut record) = self.results.get_mut(job_id) {
                record.attempts = attempt;
                record.last_error = Some(last_error.clone());
            }
            tracing::warn!(job_id, attempt, error = %last_error, "callback attempt failed");
        }

        if let Some(mut record) = self.results.get_mut(job_id) {
            record.status = DeliveryStatus::Failed;
        }
        tracing::warn!(
            job_id,
            attempts = schedule.len(),
            "callback delivery exhausted, result remains pollable"
        );
    }

    /// Looks up a stored result for polling.
    #[must_use]
    pub fn result(&self, job_id: &str) -> Option<ResultView> {
        self.results.get(job_id).map(|record| ResultView {
            job_id: job_id.to_owned(),
            agent: record.agent.clone(),
            status: record.status,
            attempts: record.attempts,
            data: record.payload.clone(),
            last_error: record.last_error.clone(),
            delivered_at: record.delivered_at,
        })
    }

    /// Drops results older than the retention window, counted from when
    /// the result was stored and regardless of delivery outcome. The
    /// delivery loop tolerates its record vanishing mid-flight.
    pub fn purge_expired(&self) {
        let retention = self.config.retention;
        self.results
            .retain(|_, record| record.created_at.elapsed() < retention);
    }

    /// Counters for the health endpoint.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        let mut stats = DispatchStats {
            stored: self.results.len(),
            pending: 0,
            delivered: 0,
            failed: 0,
        };
        for record in &self.results {
            match record.status {
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::Delivered => stats.delivered += 1,
                DeliveryStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Attaches delivery metadata to the payload. Object payloads get a
/// `_meta` key; anything else is wrapped so the metadata has a place.
fn decorate(payload: &Value, job_id: &str, attempt: u32) -> Value {
    let meta = json!({
        "job_id": job_id,
        "attempt": attempt,
        "delivered_at": UnixTimestamp::now(),
    });
    match payload {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert("_meta".to_owned(), meta);
            Value::Object(map)
        }
        other => json!({ "data": other, "_meta": meta }),
    }
}
