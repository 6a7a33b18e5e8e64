//! Downstream forwarder
//!
//! Re-posts accepted calls to configured peer servers. A bounded job queue
//! feeds a small worker pool; when the queue is full the oldest pending
//! forward is dropped and logged. Posting retries with exponential backoff
//! before giving up. Forwarding never blocks ingestion.

use parking_lot::Mutex;
use radiocast_core::config::DownstreamConfig;
use radiocast_core::types::{Call, ConfigSnapshot, Downstream};
use radiocast_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

struct ForwardJob {
    downstream: Downstream,
    call: Arc<Call>,
}

/// Retry schedule for one forward
#[derive(Debug, Clone, Copy)]
struct RetrySchedule {
    max_retries: u32,
    base: Duration,
    max: Duration,
}

impl RetrySchedule {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// The forwarding pool
pub struct Forwarder {
    jobs: async_channel::Sender<ForwardJob>,
    // Held to pop the oldest pending job when the queue is full.
    overflow: async_channel::Receiver<ForwardJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    flush_timeout: Duration,
}

impl Forwarder {
    /// Start the worker pool
    #[must_use]
    pub fn start(config: &DownstreamConfig, store: Store) -> Self {
        let (tx, rx) = async_channel::bounded(config.queue_size.max(1));
        let client = reqwest::Client::new();
        let retry = RetrySchedule {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.retry_base_delay_ms),
            max: Duration::from_millis(config.retry_max_delay_ms),
        };

        let workers = (0..config.workers.max(1))
            .map(|_| {
                let rx = rx.clone();
                let client = client.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    while let Ok(job) = rx.recv().await {
                        forward(&client, &store, retry, &job).await;
                    }
                })
            })
            .collect();

        Self {
            jobs: tx,
            overflow: rx,
            workers: Mutex::new(workers),
            flush_timeout: Duration::from_secs(config.flush_timeout),
        }
    }

    /// Queue an accepted call for every matching downstream
    pub fn schedule(&self, snapshot: &ConfigSnapshot, call: &Call) {
        let call = Arc::new(call.clone());
        for downstream in matching_downstreams(snapshot, &call) {
            let mut job = ForwardJob {
                downstream: downstream.clone(),
                call: call.clone(),
            };
            loop {
                match self.jobs.try_send(job) {
                    Ok(()) => break,
                    Err(async_channel::TrySendError::Full(returned)) => {
                        job = returned;
                        if self.overflow.try_recv().is_ok() {
                            warn!("forward queue full, dropped oldest pending forward");
                        } else {
                            break;
                        }
                    }
                    Err(async_channel::TrySendError::Closed(_)) => break,
                }
            }
        }
    }

    /// Stop accepting jobs and give in-flight forwards a bounded flush window
    pub async fn shutdown(&self) {
        self.jobs.close();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if tokio::time::timeout(
            self.flush_timeout,
            futures_util::future::join_all(handles),
        )
        .await
        .is_err()
        {
            warn!("downstream flush timed out, dropping pending forwards");
        }
    }
}

/// Enabled downstreams whose allow-list admits the call
fn matching_downstreams<'a>(snapshot: &'a ConfigSnapshot, call: &Call) -> Vec<&'a Downstream> {
    snapshot
        .downstreams
        .iter()
        .filter(|downstream| {
            !downstream.disabled && downstream.systems.allows(call.system, call.talkgroup)
        })
        .collect()
}

async fn forward(client: &reqwest::Client, store: &Store, retry: RetrySchedule, job: &ForwardJob) {
    for attempt in 0..=retry.max_retries {
        match post_call(client, job).await {
            Ok(()) => {
                debug!(url = %job.downstream.url, id = ?job.call.id, "call forwarded");
                return;
            }
            Err(err) if attempt < retry.max_retries => {
                warn!(
                    url = %job.downstream.url,
                    attempt,
                    error = %err,
                    "forward failed, retrying"
                );
                tokio::time::sleep(retry.delay(attempt)).await;
            }
            Err(err) => {
                error!(url = %job.downstream.url, error = %err, "forward failed, giving up");
                let _ = store
                    .append_log(
                        "error",
                        &format!(
                            "downstream {} failed for call {:?}: {err}",
                            job.downstream.url, job.call.id
                        ),
                    )
                    .await;
            }
        }
    }
}

async fn post_call(client: &reqwest::Client, job: &ForwardJob) -> Result<(), String> {
    let call = &job.call;
    let mut form = reqwest::multipart::Form::new()
        .text("key", job.downstream.api_key.clone())
        .text("system", call.system.to_string())
        .text("talkgroup", call.talkgroup.to_string())
        .text("dateTime", call.date_time.to_rfc3339())
        .text(
            "frequencies",
            serde_json::to_string(&call.frequencies).map_err(|e| e.to_string())?,
        )
        .text(
            "patches",
            serde_json::to_string(&call.patches).map_err(|e| e.to_string())?,
        )
        .text(
            "sources",
            serde_json::to_string(&call.sources).map_err(|e| e.to_string())?,
        );

    if let Some(frequency) = call.frequency {
        form = form.text("frequency", frequency.to_string());
    }
    if let Some(source) = call.source {
        form = form.text("source", source.to_string());
    }

    if let Some(audio) = &call.audio {
        let mut part = reqwest::multipart::Part::bytes(audio.clone()).file_name(
            call.audio_name
                .clone()
                .unwrap_or_else(|| "audio".to_string()),
        );
        if let Some(audio_type) = &call.audio_type {
            part = part.mime_str(audio_type).map_err(|e| e.to_string())?;
        }
        form = form.part("audio", part);
        if let Some(name) = &call.audio_name {
            form = form.text("audioName", name.clone());
        }
        if let Some(audio_type) = &call.audio_type {
            form = form.text("audioType", audio_type.clone());
        }
    } else if let Some(url) = &call.audio_url {
        form = form.text("audioUrl", url.clone());
    }

    let response = client
        .post(&job.downstream.url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("unexpected status {}", response.status()))
    }
}
