//! YouTube executor: yt-dlp as a managed subprocess.
//!
//! The download is piped to stdout and byte-counted there; nothing is kept
//! on disk. yt-dlp exiting early is not a failure: traffic generation is
//! continuous, so the process is relaunched after 2 s until the deadline.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use ngoogle_common::model::Task;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reporter::TaskReporter;

use super::compute_end_time;

const RESPAWN_BACKOFF: Duration = Duration::from_secs(2);
const SINK_BUF_SIZE: usize = 32 * 1024;

pub async fn run(
    cancel: CancellationToken,
    task: &Task,
    reporter: Arc<TaskReporter>,
) -> Result<()> {
    if task.target_url.is_empty() {
        return Err(anyhow!("target_url is required for youtube task"));
    }

    let args = build_args(task);
    info!(task = %task.id, ?args, "youtube executor starting");

    let end_time = compute_end_time(task, Utc::now());
    loop {
        if cancel.is_cancelled() || Utc::now() >= end_time {
            return Ok(());
        }

        let remaining = (end_time - Utc::now()).to_std().unwrap_or_default();
        match run_once(&cancel, &args, remaining, reporter.clone()).await {
            Ok(exited_early) => {
                if !exited_early {
                    // cancelled or deadline hit inside run_once
                    return Ok(());
                }
            }
            Err(e) => {
                warn!(task = %task.id, "yt-dlp run failed: {e}");
                reporter.record_error();
            }
        }

        if Utc::now() >= end_time {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(RESPAWN_BACKOFF) => {}
        }
    }
}

/// Spawns yt-dlp once and drains it. Returns `Ok(true)` when the process
/// exited on its own, `Ok(false)` when it was killed by cancel or deadline.
async fn run_once(
    cancel: &CancellationToken,
    args: &[String],
    deadline: Duration,
    reporter: Arc<TaskReporter>,
) -> Result<bool> {
    let mut child = Command::new("yt-dlp")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("spawn yt-dlp")?;

    let mut stdout = child.stdout.take().context("yt-dlp stdout pipe")?;
    let stderr = child.stderr.take().context("yt-dlp stderr pipe")?;

    // Counting sink over stdout; ends when the pipe closes.
    let sink = tokio::spawn(async move {
        let mut buf = vec![0u8; SINK_BUF_SIZE];
        loop {
            let n = match stdout.read(&mut buf).await {
                Ok(n) => n,
                Err(_) => return,
            };
            if n == 0 {
                return;
            }
            reporter.record_bytes(n as u64);
        }
    });

    // Stderr line reader terminates when the process closes its pipe.
    let logs = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("yt-dlp: {line}");
        }
    });

    let mut exit = None;
    tokio::select! {
        status = child.wait() => exit = Some(status),
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(deadline) => {}
    }

    let exited_on_its_own = match exit {
        Some(status) => {
            let status = status.context("wait yt-dlp")?;
            if !status.success() {
                debug!("yt-dlp exited with {status}");
            }
            true
        }
        None => {
            let _ = child.kill().await;
            false
        }
    };

    // Pipes close once the process is gone, so both drains finish.
    let _ = sink.await;
    let _ = logs.await;
    Ok(exited_on_its_own)
}

fn build_args(task: &Task) -> Vec<String> {
    let mut args = Vec::new();
    if task.target_rate_mbps > 0.0 {
        let bytes_per_sec = (task.target_rate_mbps * 1e6 / 8.0) as i64;
        args.push("--limit-rate".into());
        args.push(bytes_per_sec.to_string());
    }
    if task.concurrent_fragments > 1 {
        args.push("--concurrent-fragments".into());
        args.push(task.concurrent_fragments.to_string());
    }
    if task.retries > 0 {
        args.push("--retries".into());
        args.push(task.retries.to_string());
    }
    args.push("--no-playlist".into());
    args.push("--output".into());
    args.push("-".into()); // stream the download to stdout
    args.push(task.target_url.clone());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngoogle_common::model::{Distribution, TaskStatus, TaskType};

    fn task() -> Task {
        let now = Utc::now();
        Task {
            id: "t1".into(),
            name: String::new(),
            task_type: TaskType::Youtube,
            target_url: "https://youtube.com/watch?v=abc".into(),
            agent_id: String::new(),
            status: TaskStatus::Running,
            target_rate_mbps: 8.0,
            start_at: None,
            end_at: None,
            duration_sec: 0,
            total_bytes_target: 0,
            total_requests_target: 0,
            dispatch_rate_tpm: 0,
            dispatch_batch_size: 1,
            distribution: Distribution::Flat,
            jitter_pct: 0.0,
            ramp_up_sec: 0,
            ramp_down_sec: 0,
            traffic_profile_id: String::new(),
            concurrent_fragments: 4,
            retries: 5,
            total_bytes_done: 0,
            error_message: String::new(),
            dispatched_at: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn argv_carries_rate_and_fragments() {
        let args = build_args(&task());
        // 8 Mbps = 1,000,000 bytes/s
        let joined = args.join(" ");
        assert!(joined.contains("--limit-rate 1000000"));
        assert!(joined.contains("--concurrent-fragments 4"));
        assert!(joined.contains("--retries 5"));
        assert!(joined.contains("--no-playlist"));
        assert!(joined.contains("--output -"));
        assert!(joined.ends_with("https://youtube.com/watch?v=abc"));
    }

    #[test]
    fn argv_omits_rate_when_unlimited() {
        let mut t = task();
        t.target_rate_mbps = 0.0;
        let args = build_args(&t);
        assert!(!args.contains(&"--limit-rate".to_string()));
    }
}
