//! Per-route sliding-window statistics.

use std::time::Duration;
use tokio::time::Instant;

const WINDOW_SECONDS: usize = 60;
const RESERVOIR_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Whole-second stamp this bucket currently represents.
    stamp: u64,
    hits: u32,
    errors: u32,
}

/// Point-in-time view of one route's statistics.
#[derive(Debug, Clone)]
pub struct RouteStatsSnapshot {
    /// Total requests observed, monotonic.
    pub hits: u64,
    /// Requests per minute over the sliding window.
    pub requests_per_minute: f64,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub avg_latency: Duration,
    /// Errors over requests in the window; 0.0 with no traffic.
    pub error_rate: f64,
    pub last_seen: Instant,
}

/// One route's sliding window: 60 one-second buckets plus a bounded latency
/// reservoir. Stale buckets are reclaimed lazily as time advances.
pub(crate) struct RouteWindow {
    buckets: [Bucket; WINDOW_SECONDS],
    origin: Instant,
    latencies_us: Vec<u64>,
    latency_next: usize,
    latency_sum_us: u64,
    latency_count: u64,
    total_hits: u64,
    last_seen: Instant,
    // Response-shape repeatability for ultra promotion.
    shape: Option<u64>,
    shape_run: u32,
    last_shape_change: Instant,
    min_change_interval: Option<Duration>,
}

impl RouteWindow {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            buckets: [Bucket::default(); WINDOW_SECONDS],
            origin: now,
            latencies_us: Vec::with_capacity(RESERVOIR_SIZE),
            latency_next: 0,
            latency_sum_us: 0,
            latency_count: 0,
            total_hits: 0,
            last_seen: now,
            shape: None,
            shape_run: 0,
            last_shape_change: now,
            min_change_interval: None,
        }
    }

    fn second(&self, now: Instant) -> u64 {
        now.duration_since(self.origin).as_secs()
    }

    fn bucket_mut(&mut self, now: Instant) -> &mut Bucket {
        let second = self.second(now);
        let bucket = &mut self.buckets[(second as usize) % WINDOW_SECONDS];
        if bucket.stamp != second {
            *bucket = Bucket {
                stamp: second,
                hits: 0,
                errors: 0,
            };
        }
        bucket
    }

    pub(crate) fn record(&mut self, now: Instant, latency: Duration, is_error: bool) {
        let bucket = self.bucket_mut(now);
        bucket.hits += 1;
        if is_error {
            bucket.errors += 1;
        }
        self.total_hits += 1;
        self.last_seen = now;

        let micros = latency.as_micros() as u64;
        if self.latencies_us.len() < RESERVOIR_SIZE {
            self.latencies_us.push(micros);
        } else {
            self.latencies_us[self.latency_next] = micros;
        }
        self.latency_next = (self.latency_next + 1) % RESERVOIR_SIZE;
        self.latency_sum_us += micros;
        self.latency_count += 1;
    }

    /// Records the fingerprint of the response shape; tracks how long runs
    /// of identical shapes are and how often the shape changes.
    pub(crate) fn record_shape(&mut self, now: Instant, fingerprint: u64) {
        match self.shape {
            Some(previous) if previous == fingerprint => {
                self.shape_run = self.shape_run.saturating_add(1);
            }
            Some(_) => {
                let interval = now.duration_since(self.last_shape_change);
                self.min_change_interval = Some(match self.min_change_interval {
                    Some(min) => min.min(interval),
                    None => interval,
                });
                self.last_shape_change = now;
                self.shape = Some(fingerprint);
                self.shape_run = 1;
            }
            None => {
                self.shape = Some(fingerprint);
                self.shape_run = 1;
                self.last_shape_change = now;
            }
        }
    }

    /// Length of the current run of identical response shapes.
    pub(crate) fn shape_run(&self) -> u32 {
        self.shape_run
    }

    /// TTL for a precomputed template, derived from the observed shape
    /// freshness: the shortest interval between shape changes, clamped to
    /// [1 s, 300 s]. A shape that never changed gets the upper clamp.
    pub(crate) fn freshness_ttl(&self) -> Duration {
        self.min_change_interval
            .unwrap_or(Duration::from_secs(300))
            .clamp(Duration::from_secs(1), Duration::from_secs(300))
    }

    fn window_totals(&self, now: Instant) -> (u64, u64) {
        let current = self.second(now);
        let oldest = current.saturating_sub(WINDOW_SECONDS as u64 - 1);
        let mut hits = 0u64;
        let mut errors = 0u64;
        for bucket in &self.buckets {
            if bucket.stamp >= oldest && bucket.stamp <= current {
                hits += u64::from(bucket.hits);
                errors += u64::from(bucket.errors);
            }
        }
        (hits, errors)
    }

    pub(crate) fn requests_per_minute(&self, now: Instant) -> f64 {
        self.window_totals(now).0 as f64
    }

    fn percentile(sorted: &[u64], p: f64) -> Duration {
        if sorted.is_empty() {
            return Duration::ZERO;
        }
        let rank = ((sorted.len() - 1) as f64 * p).round() as usize;
        Duration::from_micros(sorted[rank])
    }

    pub(crate) fn avg_latency(&self) -> Duration {
        if self.latency_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.latency_sum_us / self.latency_count)
        }
    }

    pub(crate) fn snapshot(&self, now: Instant) -> RouteStatsSnapshot {
        let (hits, errors) = self.window_totals(now);
        let mut sorted = self.latencies_us.clone();
        sorted.sort_unstable();
        RouteStatsSnapshot {
            hits: self.total_hits,
            requests_per_minute: hits as f64,
            p50: Self::percentile(&sorted, 0.50),
            p95: Self::percentile(&sorted, 0.95),
            p99: Self::percentile(&sorted, 0.99),
            avg_latency: self.avg_latency(),
            error_rate: if hits == 0 {
                0.0
            } else {
                errors as f64 / hits as f64
            },
            last_seen: self.last_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_counts() {
        let now = Instant::now();
        let mut window = RouteWindow::new(now);
        for _ in 0..30 {
            window.record(Instant::now(), ms(10), false);
        }
        assert_eq!(window.requests_per_minute(Instant::now()), 30.0);

        // Requests older than the window stop counting.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(window.requests_per_minute(Instant::now()), 0.0);
        let snapshot = window.snapshot(Instant::now());
        assert_eq!(snapshot.hits, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_rate() {
        let now = Instant::now();
        let mut window = RouteWindow::new(now);
        for i in 0..10 {
            window.record(Instant::now(), ms(5), i % 5 == 0);
        }
        let snapshot = window.snapshot(Instant::now());
        assert!((snapshot.error_rate - 0.2).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_percentiles() {
        let now = Instant::now();
        let mut window = RouteWindow::new(now);
        for v in 1..=100u64 {
            window.record(Instant::now(), ms(v), false);
        }
        let snapshot = window.snapshot(Instant::now());
        assert_eq!(snapshot.p50, ms(50));
        assert_eq!(snapshot.p95, ms(95));
        assert_eq!(snapshot.p99, ms(99));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shape_runs_and_freshness() {
        let now = Instant::now();
        let mut window = RouteWindow::new(now);
        for _ in 0..5 {
            window.record_shape(Instant::now(), 0xAA);
        }
        assert_eq!(window.shape_run(), 5);

        tokio::time::advance(Duration::from_secs(7)).await;
        window.record_shape(Instant::now(), 0xBB);
        assert_eq!(window.shape_run(), 1);
        assert_eq!(window.freshness_ttl(), Duration::from_secs(7));

        // A never-changing shape gets the upper clamp.
        let fresh = RouteWindow::new(Instant::now());
        assert_eq!(fresh.freshness_ttl(), Duration::from_secs(300));
    }
}
