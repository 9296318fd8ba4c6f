//! Per-task metrics reporting.
//!
//! The executor feeds bytes/requests/errors from the I/O path; every 5 s the
//! reporter pushes a sample to the master, with one final flush when the
//! task context is cancelled. Reporting failures are logged and dropped.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use ngoogle_common::model::TaskMetrics;
use ngoogle_common::ratelimit::Meter;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::MasterClient;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Counters {
    bytes_total: i64,
    request_count: i64,
    error_count: i64,
}

pub struct TaskReporter {
    task_id: String,
    agent_id: String,
    client: Arc<MasterClient>,
    meter: Arc<Meter>,
    counters: Mutex<Counters>,
}

impl TaskReporter {
    pub fn new(
        task_id: String,
        agent_id: String,
        client: Arc<MasterClient>,
        meter: Arc<Meter>,
    ) -> Self {
        TaskReporter {
            task_id,
            agent_id,
            client,
            meter,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Called from the executor I/O path for every accepted chunk.
    pub fn record_bytes(&self, n: u64) {
        self.counters.lock().unwrap().bytes_total += n as i64;
        self.meter.record(n);
    }

    pub fn record_request(&self) {
        self.counters.lock().unwrap().request_count += 1;
    }

    pub fn record_error(&self) {
        self.counters.lock().unwrap().error_count += 1;
    }

    pub fn bytes_total(&self) -> i64 {
        self.counters.lock().unwrap().bytes_total
    }

    /// Reports every 5 s until cancelled, then flushes once more.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(REPORT_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.report().await;
                    return;
                }
                _ = interval.tick() => self.report().await,
            }
        }
    }

    async fn report(&self) {
        let m = {
            let c = self.counters.lock().unwrap();
            TaskMetrics {
                id: 0,
                task_id: self.task_id.clone(),
                agent_id: self.agent_id.clone(),
                bytes_total: c.bytes_total,
                bytes_delta: 0,
                rate_mbps_5s: self.meter.rate_5s(),
                rate_mbps_30s: self.meter.rate_30s(),
                request_count: c.request_count,
                error_count: c.error_count,
                recorded_at: Utc::now(),
            }
        };
        if let Err(e) = self.client.report_metrics(&m).await {
            warn!(task = %self.task_id, "report metrics failed: {e}");
        }
    }
}
