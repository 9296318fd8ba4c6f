//! Static HTTP download executor.
//!
//! Repeatedly fetches the target URL, streaming the response through the
//! token bucket and recomputing the shape multiplier once per request.
//! Transport errors and HTTP >= 400 are transient: back off 2 s and keep
//! going until the deadline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use ngoogle_common::model::Task;
use ngoogle_common::ratelimit::TokenBucket;
use ngoogle_common::shape::{self, ProfilePoint};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::reporter::TaskReporter;

use super::{compute_end_time, task_elapsed};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; ngoogle-agent/1.0)";
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

pub async fn run(
    cancel: CancellationToken,
    task: &Task,
    points: &[ProfilePoint],
    reporter: Arc<TaskReporter>,
) -> Result<()> {
    if task.target_url.is_empty() {
        return Err(anyhow!("target_url is required for static task"));
    }

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()?;

    let local_start = Utc::now();
    let end_time = compute_end_time(task, local_start);
    let bucket = TokenBucket::new(task.target_rate_mbps, 2.0);

    // First-request dither so a fleet starting together does not align.
    if task.jitter_pct > 0.0 {
        let delay = shape::apply_jitter(Duration::from_millis(100), task.jitter_pct);
        if sleep_cancellable(&cancel, delay).await.is_err() {
            return Ok(());
        }
    }

    let mut requests: i64 = 0;
    loop {
        if cancel.is_cancelled() || Utc::now() >= end_time {
            return Ok(());
        }
        let bytes_done = reporter.bytes_total();
        if task.total_bytes_target > 0 && bytes_done >= task.total_bytes_target {
            return Ok(());
        }
        if task.total_requests_target > 0 && requests >= task.total_requests_target {
            return Ok(());
        }

        let mult = shape::rate_for_task(task, task_elapsed(task, local_start), points);
        bucket.set_rate(task.target_rate_mbps * mult);

        match download_once(&http, &task.target_url, &bucket, &cancel, &reporter).await {
            Ok(()) => {
                requests += 1;
                reporter.record_request();
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                debug!(task = %task.id, "static download error, retrying: {e}");
                reporter.record_error();
                if sleep_cancellable(&cancel, RETRY_BACKOFF).await.is_err() {
                    return Ok(());
                }
                continue;
            }
        }

        if task.dispatch_rate_tpm > 0 {
            let interval =
                shape::dispatch_interval(task.dispatch_rate_tpm, task.dispatch_batch_size);
            let interval = shape::apply_jitter(interval, task.jitter_pct);
            if sleep_cancellable(&cancel, interval).await.is_err() {
                return Ok(());
            }
        }
    }
}

/// One GET, streamed chunk by chunk. Each chunk passes through the bucket
/// before it is counted, so cancellation is observed within one chunk.
async fn download_once(
    http: &reqwest::Client,
    url: &str,
    bucket: &TokenBucket,
    cancel: &CancellationToken,
    reporter: &TaskReporter,
) -> Result<()> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(anyhow!("HTTP {status}"));
    }

    let mut resp = resp;
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = resp.chunk() => chunk?,
        };
        let Some(chunk) = chunk else {
            return Ok(());
        };
        if bucket.wait(chunk.len() as u64, cancel).await.is_err() {
            return Ok(()); // cancelled mid-wait
        }
        reporter.record_bytes(chunk.len() as u64);
    }
}

async fn sleep_cancellable(cancel: &CancellationToken, d: Duration) -> Result<(), ()> {
    if d.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(()),
        _ = tokio::time::sleep(d) => Ok(()),
    }
}
