use std::{fmt, time::Duration};

use crate::record::{Failure, Record};

/// Cut points of the percentile table. The longest request is reported separately.
pub const PERCENTAGES: [usize; 8] = [50, 66, 75, 80, 90, 95, 98, 99];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every configured request was processed.
    Completed,
    /// A request failed and continue-on-error is off.
    Failure,
    TimeLimit,
    Interrupted,
    /// No worker is left to produce records.
    Exhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::Completed => "all requests completed",
            StopReason::Failure => "a request failed (use -r to continue on errors)",
            StopReason::TimeLimit => "time limit reached",
            StopReason::Interrupted => "interrupted",
            StopReason::Exhausted => "all workers exited",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounts {
    pub connect: usize,
    pub response: usize,
    pub receive: usize,
    pub length: usize,
    pub timeout: usize,
    pub exception: usize,
}

impl FailureCounts {
    fn count(&mut self, failure: &Failure) {
        match failure {
            Failure::Connect(_) => self.connect += 1,
            Failure::Response(_) => self.response += 1,
            Failure::Receive(_) => self.receive += 1,
            Failure::Length { .. } => self.length += 1,
            Failure::Timeout(_) => self.timeout += 1,
            Failure::Exception(_) => self.exception += 1,
        }
    }
}

/// Running totals of a benchmark. Only the monitor writes to it.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Latencies of successful requests, in arrival order.
    pub latencies: Vec<Duration>,

    pub total_requests: usize,
    pub total_failed: usize,
    pub failures: FailureCounts,

    pub total_execution_time: Duration,
    pub total_response_time: Duration,
    pub total_received: u64,

    pub stop_reason: Option<StopReason>,
}

impl Stats {
    pub fn with_capacity(requests: usize) -> Self {
        Stats {
            latencies: Vec::with_capacity(requests),
            ..Stats::default()
        }
    }

    pub fn update(&mut self, record: &Record) {
        self.total_requests += 1;

        match &record.error {
            Some(failure) => {
                self.total_failed += 1;
                self.failures.count(failure);
            }
            None => {
                self.total_response_time += record.latency;
                self.total_received += record.bytes;
                self.latencies.push(record.latency);
            }
        }
    }

    /// Latency figures of the run, `None` when there is nothing meaningful to report.
    pub fn summary(&self, concurrency: usize) -> Option<Summary> {
        if self.latencies.is_empty() || self.total_execution_time.is_zero() {
            return None;
        }

        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();

        let elapsed_secs = self.total_execution_time.as_secs_f64();
        let mean_across = mean_across(self.total_execution_time, self.total_requests);
        let percentiles = PERCENTAGES
            .iter()
            .filter_map(|&p| percentile(&sorted, p).map(|d| (p, d)))
            .collect();

        Some(Summary {
            requests_per_second: self.total_requests as f64 / elapsed_secs,
            time_per_request_ms: concurrency as f64 * as_millis_f64(self.total_execution_time)
                / self.total_requests as f64,
            time_per_request_across_ms: as_millis_f64(self.total_execution_time)
                / self.total_requests as f64,
            transfer_rate_kbps: (self.total_received / 1024) as f64 / elapsed_secs,
            min: sorted[0],
            mean: mean_across,
            std_dev_ms: std_dev(&sorted) / 1_000_000.0,
            median: sorted[sorted.len() / 2],
            max: sorted[sorted.len() - 1],
            percentiles,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub requests_per_second: f64,
    /// Concurrency-weighted mean.
    pub time_per_request_ms: f64,
    pub time_per_request_across_ms: f64,
    pub transfer_rate_kbps: f64,

    pub min: Duration,
    /// Wall-clock time divided by request count, not the mean of the samples.
    pub mean: Duration,
    pub std_dev_ms: f64,
    pub median: Duration,
    pub max: Duration,
    pub percentiles: Vec<(usize, Duration)>,
}

/// Mean time per request across all concurrent requests.
pub fn mean_across(total_execution_time: Duration, total_requests: usize) -> Duration {
    if total_requests == 0 {
        return Duration::ZERO;
    }
    let nanos = total_execution_time.as_nanos() / total_requests as u128;
    Duration::from_nanos(nanos as u64)
}

/// Population standard deviation in nanoseconds. The mean is truncated to whole nanoseconds.
pub fn std_dev(samples: &[Duration]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: u128 = samples.iter().map(Duration::as_nanos).sum();
    let mean = (sum / samples.len() as u128) as f64;

    let sum_of_squares: f64 = samples
        .iter()
        .map(|d| (d.as_nanos() as f64 - mean).powi(2))
        .sum();
    (sum_of_squares / samples.len() as f64).sqrt()
}

/// `sorted[floor(p * len / 100)]`, clamped to the largest sample.
pub fn percentile(sorted: &[Duration], p: usize) -> Option<Duration> {
    let last = sorted.len().checked_sub(1)?;
    Some(sorted[(p * sorted.len() / 100).min(last)])
}

fn as_millis_f64(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}
