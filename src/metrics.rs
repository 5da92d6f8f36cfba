//! Scraper self-metrics
//!
//! # Metrics
//!
//! - `jmx_scraper_ticks_total` - Ticks started
//! - `jmx_scraper_ticks_skipped_total` - Ticks that emitted nothing because no
//!   session was available or the read failed
//! - `jmx_scraper_connect_attempts_total` / `jmx_scraper_connect_failures_total`
//! - `jmx_scraper_read_failures_total`
//! - `jmx_scraper_observations` - Observations emitted by the last tick
//! - `jmx_scraper_tick_duration_seconds` - Histogram of tick durations

use std::sync::atomic::{AtomicU64, Ordering};

use crate::emitter::PrometheusSample;
use crate::mapping::MetricKind;

const TICK_DURATION: &str = "jmx_scraper_tick_duration_seconds";

/// Histogram buckets for tick duration (in seconds)
pub const DEFAULT_HISTOGRAM_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thread-safe counter using atomic operations
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe gauge using atomic operations
#[derive(Debug)]
pub struct Gauge {
    /// Stored as bits of f64 for atomic operations
    value: AtomicU64,
}

impl Default for Gauge {
    fn default() -> Self {
        Self {
            value: AtomicU64::new(0.0_f64.to_bits()),
        }
    }
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: f64) {
        self.value.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Thread-safe histogram
#[derive(Debug)]
pub struct Histogram {
    /// Upper bounds, ending with +Inf
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: &[f64]) -> Self {
        let mut sorted_buckets: Vec<f64> = buckets.to_vec();
        sorted_buckets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if sorted_buckets
            .last()
            .map(|v| !v.is_infinite())
            .unwrap_or(true)
        {
            sorted_buckets.push(f64::INFINITY);
        }

        let bucket_counts = (0..sorted_buckets.len())
            .map(|_| AtomicU64::new(0))
            .collect();

        Self {
            buckets: sorted_buckets,
            bucket_counts,
            sum: AtomicU64::new(0.0_f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, v: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        // atomic f64 add
        loop {
            let current = self.sum.load(Ordering::Relaxed);
            let new = f64::from_bits(current) + v;
            if self
                .sum
                .compare_exchange_weak(current, new.to_bits(), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        for (i, &bound) in self.buckets.iter().enumerate() {
            if v <= bound {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Bucket boundaries and their cumulative counts
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .zip(self.bucket_counts.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(DEFAULT_HISTOGRAM_BUCKETS)
    }
}

/// Counters updated by the scheduler
#[derive(Debug, Default)]
pub struct ScrapeStats {
    pub ticks: Counter,
    pub skipped_ticks: Counter,
    pub connect_attempts: Counter,
    pub connect_failures: Counter,
    pub read_failures: Counter,
    pub last_observations: Gauge,
    pub tick_duration: Histogram,
}

impl ScrapeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks.inc();
    }

    pub fn record_skipped(&self) {
        self.skipped_ticks.inc();
        self.last_observations.set(0.0);
    }

    pub fn record_connect(&self, ok: bool) {
        self.connect_attempts.inc();
        if !ok {
            self.connect_failures.inc();
        }
    }

    pub fn record_read_failure(&self) {
        self.read_failures.inc();
    }

    pub fn record_tick_done(&self, observations: usize, duration_seconds: f64) {
        self.last_observations.set(observations as f64);
        self.tick_duration.observe(duration_seconds);
    }

    /// Render as exposition samples
    pub fn to_samples(&self) -> Vec<PrometheusSample> {
        let counter = |name: &str, help: &str, value: u64| {
            PrometheusSample::new(name, value as f64)
                .with_kind(MetricKind::Counter)
                .with_help(help)
        };

        let mut samples = vec![
            PrometheusSample::new("jmx_scraper_info", 1.0)
                .with_help("jmx-scraper build information")
                .with_label("version", env!("CARGO_PKG_VERSION")),
            counter("jmx_scraper_ticks_total", "Ticks started", self.ticks.get()),
            counter(
                "jmx_scraper_ticks_skipped_total",
                "Ticks that emitted no observations because of a connection or read failure",
                self.skipped_ticks.get(),
            ),
            counter(
                "jmx_scraper_connect_attempts_total",
                "Connection attempts",
                self.connect_attempts.get(),
            ),
            counter(
                "jmx_scraper_connect_failures_total",
                "Failed connection attempts",
                self.connect_failures.get(),
            ),
            counter(
                "jmx_scraper_read_failures_total",
                "Attribute reads that failed",
                self.read_failures.get(),
            ),
            PrometheusSample::new("jmx_scraper_observations", self.last_observations.get())
                .with_help("Observations emitted by the last tick"),
        ];

        let family = TICK_DURATION;
        for (bound, count) in self.tick_duration.get_buckets() {
            let le = if bound.is_infinite() {
                "+Inf".to_string()
            } else {
                format!("{}", bound)
            };
            samples.push(
                PrometheusSample::new(format!("{family}_bucket"), count as f64)
                    .in_histogram(family)
                    .with_help("Histogram of tick durations")
                    .with_label("le", le),
            );
        }
        samples.push(
            PrometheusSample::new(format!("{family}_sum"), self.tick_duration.get_sum())
                .in_histogram(family),
        );
        samples.push(
            PrometheusSample::new(
                format!("{family}_count"),
                self.tick_duration.get_count() as f64,
            )
            .in_histogram(family),
        );

        samples
    }
}
