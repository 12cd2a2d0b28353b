//! Performance analysis over a finalized history
//!
//! Derives per-function latency distributions and throughput-over-time
//! buckets for reporting. Has no bearing on the verdict and runs after the
//! checker.

use std::time::Duration;

use crate::history::{History, OpResult};

/// Latency distribution for one operation kind
#[derive(Clone, Debug)]
pub struct LatencyStats {
    pub count: usize,
    pub min: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub max: Duration,
}

impl LatencyStats {
    /// `latencies` in microseconds, any order; None when empty
    fn from_latencies(mut latencies: Vec<u64>) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        latencies.sort_unstable();

        let count = latencies.len();
        let sum: u64 = latencies.iter().sum();
        let percentile = |p: u64| {
            let idx = ((count - 1) as u64 * p / 100) as usize;
            Duration::from_micros(latencies[idx])
        };

        Some(LatencyStats {
            count,
            min: Duration::from_micros(latencies[0]),
            mean: Duration::from_micros(sum / count as u64),
            p50: percentile(50),
            p95: percentile(95),
            max: Duration::from_micros(latencies[count - 1]),
        })
    }
}

/// Per-kind latency stats plus throughput per one-second window
#[derive(Clone, Debug)]
pub struct PerfReport {
    pub read: Option<LatencyStats>,
    pub write: Option<LatencyStats>,
    pub cas: Option<LatencyStats>,
    /// (window index, completed ops); windows are 1 s wide from test start,
    /// empty windows included up to the last completion
    pub throughput: Vec<(u64, usize)>,
}

impl PerfReport {
    /// Analyze a history. Failed operations are excluded from latency
    /// stats (their latency reflects the timeout, not the service) but all
    /// completions count toward throughput.
    pub fn from_history(history: &History) -> Self {
        let mut read = Vec::new();
        let mut write = Vec::new();
        let mut cas = Vec::new();

        for op in history.ops() {
            if matches!(op.result, OpResult::Fail(_) | OpResult::Info(_)) {
                continue;
            }
            let bucket = match op.kind.name() {
                "read" => &mut read,
                "write" => &mut write,
                _ => &mut cas,
            };
            bucket.push(op.latency_micros());
        }

        let last_complete = history
            .ops()
            .iter()
            .map(|op| op.complete_ts.0)
            .max()
            .unwrap_or(0);
        let windows = last_complete / 1_000_000 + 1;
        let mut throughput: Vec<(u64, usize)> = (0..windows).map(|w| (w, 0)).collect();
        if !history.is_empty() {
            for op in history.ops() {
                let window = (op.complete_ts.0 / 1_000_000) as usize;
                throughput[window].1 += 1;
            }
        } else {
            throughput.clear();
        }

        PerfReport {
            read: LatencyStats::from_latencies(read),
            write: LatencyStats::from_latencies(write),
            cas: LatencyStats::from_latencies(cas),
            throughput,
        }
    }
}
