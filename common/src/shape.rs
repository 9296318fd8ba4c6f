//! Traffic distribution curves.
//!
//! Maps a task's elapsed runtime to a rate multiplier in [0, 1] and provides
//! the jitter / dispatch pacing helpers used by executors.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::{Distribution, Task};

/// One breakpoint of a diurnal curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub offset_sec: f64,
    pub rate_pct: f64,
}

/// Parses the JSON `points` column of a traffic profile. Malformed or empty
/// input yields no points, which the curve treats as a constant 1.0.
pub fn parse_points(raw: &str) -> Vec<ProfilePoint> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Computes the rate multiplier for a task at the given elapsed runtime.
pub fn rate_for_task(task: &Task, elapsed: Duration, points: &[ProfilePoint]) -> f64 {
    let mult = match task.distribution {
        Distribution::Diurnal => diurnal_multiplier(points, elapsed),
        Distribution::Flat | Distribution::Ramp => ramp_multiplier(task, elapsed),
    };
    mult.clamp(0.0, 1.0)
}

/// Flat and ramp share the same formula: linear ramp-up, steady 1.0, linear
/// ramp-down against the task's total duration.
fn ramp_multiplier(task: &Task, elapsed: Duration) -> f64 {
    let ramp_up = task.ramp_up_sec as f64;
    let ramp_down = task.ramp_down_sec as f64;
    let elapsed = elapsed.as_secs_f64();

    let mut total = task.duration_sec as f64;
    if let (Some(end_at), Some(started_at)) = (task.end_at, task.started_at) {
        total = (end_at - started_at).num_milliseconds() as f64 / 1000.0;
    }

    if elapsed < ramp_up {
        return elapsed / ramp_up;
    }
    if ramp_down > 0.0 && total > 0.0 && elapsed > total - ramp_down {
        let remaining = total - elapsed;
        if remaining <= 0.0 {
            return 0.0;
        }
        return remaining / ramp_down;
    }
    1.0
}

fn diurnal_multiplier(points: &[ProfilePoint], elapsed: Duration) -> f64 {
    if points.is_empty() {
        return 1.0;
    }
    let sec = elapsed.as_secs_f64();
    for pair in points.windows(2) {
        let (p0, p1) = (pair[0], pair[1]);
        if sec >= p0.offset_sec && sec <= p1.offset_sec {
            let frac = (sec - p0.offset_sec) / (p1.offset_sec - p0.offset_sec);
            return p0.rate_pct / 100.0 + frac * (p1.rate_pct - p0.rate_pct) / 100.0;
        }
    }
    points[points.len() - 1].rate_pct / 100.0
}

/// Applies +/- `jitter_pct` uniform random jitter to a duration. Non-positive
/// percentages are a no-op.
pub fn apply_jitter(d: Duration, jitter_pct: f64) -> Duration {
    if jitter_pct <= 0.0 {
        return d;
    }
    let factor = 1.0 + (rand::thread_rng().gen_range(-1.0..=1.0)) * jitter_pct / 100.0;
    Duration::from_secs_f64((d.as_secs_f64() * factor).max(0.0))
}

/// Interval between dispatch batches; zero means unthrottled.
pub fn dispatch_interval(tpm: i64, batch_size: i64) -> Duration {
    if tpm <= 0 || batch_size <= 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(60) / tpm as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskStatus, TaskType};
    use chrono::Utc;

    fn task(distribution: Distribution, duration_sec: i64, up: i64, down: i64) -> Task {
        let now = Utc::now();
        Task {
            id: "t1".into(),
            name: String::new(),
            task_type: TaskType::Static,
            target_url: "https://example.com".into(),
            agent_id: String::new(),
            status: TaskStatus::Running,
            target_rate_mbps: 10.0,
            start_at: None,
            end_at: None,
            duration_sec,
            total_bytes_target: 0,
            total_requests_target: 0,
            dispatch_rate_tpm: 0,
            dispatch_batch_size: 1,
            distribution,
            jitter_pct: 0.0,
            ramp_up_sec: up,
            ramp_down_sec: down,
            traffic_profile_id: String::new(),
            concurrent_fragments: 1,
            retries: 3,
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
    fn flat_is_one_everywhere() {
        let t = task(Distribution::Flat, 60, 0, 0);
        for sec in [0u64, 15, 30, 45, 59] {
            let mult = rate_for_task(&t, Duration::from_secs(sec), &[]);
            assert_eq!(mult, 1.0, "sec={sec}");
        }
    }

    #[test]
    fn ramp_endpoints_and_midpoints() {
        let t = task(Distribution::Ramp, 60, 10, 10);
        let cases = [
            (0u64, 0.0, 0.01),
            (5, 0.45, 0.55),
            (10, 0.99, 1.01),
            (30, 0.99, 1.01),
            (55, 0.45, 0.55),
            (60, 0.0, 0.01),
        ];
        for (sec, lo, hi) in cases {
            let mult = rate_for_task(&t, Duration::from_secs(sec), &[]);
            assert!(mult >= lo && mult <= hi, "sec={sec} mult={mult}");
        }
    }

    #[test]
    fn diurnal_interpolates_between_breakpoints() {
        let points = [
            ProfilePoint { offset_sec: 0.0, rate_pct: 20.0 },
            ProfilePoint { offset_sec: 30.0, rate_pct: 100.0 },
            ProfilePoint { offset_sec: 60.0, rate_pct: 50.0 },
        ];
        let t = task(Distribution::Diurnal, 0, 0, 0);

        let m15 = rate_for_task(&t, Duration::from_secs(15), &points);
        assert!((m15 - 0.60).abs() < 0.05, "m15={m15}");

        let m30 = rate_for_task(&t, Duration::from_secs(30), &points);
        assert!((m30 - 1.0).abs() < 0.01, "m30={m30}");

        let m45 = rate_for_task(&t, Duration::from_secs(45), &points);
        assert!((m45 - 0.75).abs() < 0.05, "m45={m45}");
    }

    #[test]
    fn diurnal_exact_at_breakpoints_and_clamps_outside() {
        let points = [
            ProfilePoint { offset_sec: 0.0, rate_pct: 20.0 },
            ProfilePoint { offset_sec: 30.0, rate_pct: 100.0 },
            ProfilePoint { offset_sec: 60.0, rate_pct: 50.0 },
        ];
        let t = task(Distribution::Diurnal, 0, 0, 0);
        for p in points {
            let m = rate_for_task(&t, Duration::from_secs_f64(p.offset_sec), &points);
            assert!((m - p.rate_pct / 100.0).abs() < 1e-9);
        }
        // past the envelope: clamp to last point
        let m = rate_for_task(&t, Duration::from_secs(120), &points);
        assert!((m - 0.50).abs() < 1e-9);
    }

    #[test]
    fn diurnal_empty_points_is_one() {
        let t = task(Distribution::Diurnal, 0, 0, 0);
        assert_eq!(rate_for_task(&t, Duration::from_secs(42), &[]), 1.0);
    }

    #[test]
    fn multiplier_stays_in_unit_interval() {
        let t = task(Distribution::Ramp, 120, 30, 30);
        for sec in 0..200 {
            let m = rate_for_task(&t, Duration::from_secs(sec), &[]);
            assert!((0.0..=1.0).contains(&m), "sec={sec} m={m}");
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..200 {
            let d = apply_jitter(base, 10.0);
            assert!(
                d >= Duration::from_millis(90) && d <= Duration::from_millis(110),
                "jitter out of bounds: {d:?}"
            );
        }
        assert_eq!(apply_jitter(base, 0.0), base);
        assert_eq!(apply_jitter(base, -5.0), base);
    }

    #[test]
    fn dispatch_interval_from_tpm() {
        assert_eq!(dispatch_interval(60, 1), Duration::from_secs(1));
        assert_eq!(dispatch_interval(120, 1), Duration::from_millis(500));
        assert_eq!(dispatch_interval(0, 1), Duration::ZERO);
        assert_eq!(dispatch_interval(60, 0), Duration::ZERO);
    }

    #[test]
    fn parse_points_tolerates_garbage() {
        assert!(parse_points("").is_empty());
        assert!(parse_points("not json").is_empty());
        let pts = parse_points(r#"[{"offset_sec":0,"rate_pct":20}]"#);
        assert_eq!(pts.len(), 1);
        assert_eq!(pts[0].rate_pct, 20.0);
    }
}
