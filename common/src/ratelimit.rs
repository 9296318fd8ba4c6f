//! Token-bucket rate limiting and sliding-window rate measurement.
//!
//! `TokenBucket` throttles byte throughput to a configured rate in Mbps,
//! `Meter` measures realized throughput over 5 s / 30 s windows. Both are
//! internally locked and shared between the executor I/O path and the
//! reporter.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const MIN_BURST_BYTES: f64 = 65_536.0;
const METER_WINDOW: Duration = Duration::from_secs(30);

/// Returned by [`TokenBucket::wait`] when the cancellation token fires
/// mid-wait. Never an application failure; callers stop cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limiter wait cancelled")
    }
}

impl std::error::Error for Cancelled {}

struct BucketState {
    tokens: f64,
    capacity: f64,
    rate: f64, // bytes per second
    last_fill: Instant,
}

impl BucketState {
    fn fill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_fill).as_secs_f64();
        self.last_fill = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
    }
}

/// Thread-safe token bucket limiting byte throughput to a rate in Mbps.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    burst_multiplier: f64,
}

fn bytes_per_sec(rate_mbps: f64) -> f64 {
    if rate_mbps <= 0.0 {
        // effectively unlimited
        return f64::MAX / 1e6;
    }
    rate_mbps * 1e6 / 8.0
}

impl TokenBucket {
    /// Creates a bucket for the given rate. `burst_multiplier` scales the
    /// burst capacity relative to one second worth of tokens; capacity never
    /// drops below 64 KiB.
    pub fn new(rate_mbps: f64, burst_multiplier: f64) -> Self {
        let rate = bytes_per_sec(rate_mbps);
        let capacity = (rate * burst_multiplier).max(MIN_BURST_BYTES);
        TokenBucket {
            state: Mutex::new(BucketState {
                tokens: capacity,
                capacity,
                rate,
                last_fill: Instant::now(),
            }),
            burst_multiplier,
        }
    }

    /// Updates the fill rate at runtime. Capacity is rescaled and any excess
    /// tokens are clamped; the change takes effect by the next `wait`.
    pub fn set_rate(&self, rate_mbps: f64) {
        let mut st = self.state.lock().unwrap();
        st.rate = bytes_per_sec(rate_mbps);
        st.capacity = (st.rate * self.burst_multiplier).max(MIN_BURST_BYTES);
        if st.tokens > st.capacity {
            st.tokens = st.capacity;
        }
    }

    /// Blocks until `n` bytes can be consumed or `cancel` fires.
    pub async fn wait(&self, n: u64, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let n = n as f64;
        loop {
            let wait_dur = {
                let mut st = self.state.lock().unwrap();
                st.fill(Instant::now());
                if st.tokens >= n {
                    st.tokens -= n;
                    return Ok(());
                }
                let deficit = n - st.tokens;
                Duration::from_secs_f64(deficit / st.rate)
            };
            // 1 ms floor keeps tiny deficits from degenerating into a busy loop
            let wait_dur = wait_dur.max(Duration::from_millis(1));

            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(wait_dur) => {}
            }
        }
    }

    /// Consumes `n` bytes immediately if available.
    pub fn try_consume(&self, n: u64) -> bool {
        let mut st = self.state.lock().unwrap();
        st.fill(Instant::now());
        if st.tokens >= n as f64 {
            st.tokens -= n as f64;
            return true;
        }
        false
    }
}

// ============================================================================
// Sliding-window meter
// ============================================================================

/// Tracks byte throughput over sliding windows. Samples older than 30 s are
/// dropped on insert.
#[derive(Default)]
pub struct Meter {
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl Meter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `n` bytes at the current time.
    pub fn record(&self, n: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap();
        samples.push_back((now, n));
        while let Some((ts, _)) = samples.front() {
            if now.duration_since(*ts) > METER_WINDOW {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average rate in Mbps over the last 5 seconds.
    pub fn rate_5s(&self) -> f64 {
        self.rate_over(Duration::from_secs(5))
    }

    /// Average rate in Mbps over the last 30 seconds.
    pub fn rate_30s(&self) -> f64 {
        self.rate_over(Duration::from_secs(30))
    }

    fn rate_over(&self, window: Duration) -> f64 {
        let now = Instant::now();
        let samples = self.samples.lock().unwrap();
        let total: u64 = samples
            .iter()
            .filter(|(ts, _)| now.duration_since(*ts) <= window)
            .map(|(_, n)| n)
            .sum();
        total as f64 / window.as_secs_f64() / 1e6 * 8.0
    }
}
