//! Throughput sampling for upload sessions.

use serde::Serialize;
use std::collections::VecDeque;

/// minimum spacing between two recorded samples
pub const SAMPLE_INTERVAL_MS: u64 = 200;
/// samples older than this (relative to the newest) are dropped
pub const RATE_WINDOW_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSample {
    pub bytes_received: u64,
    pub timestamp: u64,
}

/// Sliding window of `(bytes_received, timestamp_ms)` samples.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    samples: VecDeque<TransferSample>,
    min_interval_ms: u64,
    window_ms: u64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(SAMPLE_INTERVAL_MS, RATE_WINDOW_MS)
    }
}

impl ProgressTracker {
    pub fn new(min_interval_ms: u64, window_ms: u64) -> Self {
        Self {
            samples: VecDeque::new(),
            min_interval_ms,
            window_ms,
        }
    }

    /// Records a sample unless the previous one is younger than the minimum
    /// interval. Returns whether the sample was kept.
    pub fn record(&mut self, bytes_received: u64, now_ms: u64) -> bool {
        if let Some(last) = self.samples.back() {
            if now_ms < last.timestamp + self.min_interval_ms {
                return false;
            }
        }
        self.samples.push_back(TransferSample {
            bytes_received,
            timestamp: now_ms,
        });
        self.prune(now_ms);
        true
    }

    fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.samples.len() > 1 && self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &TransferSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// samples within the window ending at the newest sample, oldest first
    pub fn windowed(&self) -> Vec<TransferSample> {
        let Some(last) = self.samples.back() else {
            return Vec::new();
        };
        let start = last.timestamp.saturating_sub(self.window_ms);
        self.samples
            .iter()
            .filter(|s| s.timestamp >= start)
            .copied()
            .collect()
    }

    /// Bytes per second across the window.
    ///
    /// Only adjacent pairs where both bytes and time advanced count, so idle
    /// stretches (verification-only traffic, stalls) do not drag the rate down.
    pub fn rate(&self) -> f64 {
        transfer_rate(self.samples.iter().copied())
    }
}

/// rate over an ordered sample sequence; 0 without a usable pair
pub fn transfer_rate(samples: impl IntoIterator<Item = TransferSample>) -> f64 {
    let mut bytes = 0u64;
    let mut millis = 0u64;
    let mut prev: Option<TransferSample> = None;
    for sample in samples {
        if let Some(p) = prev {
            if sample.bytes_received > p.bytes_received && sample.timestamp > p.timestamp {
                bytes += sample.bytes_received - p.bytes_received;
                millis += sample.timestamp - p.timestamp;
            }
        }
        prev = Some(sample);
    }
    if millis == 0 {
        return 0.0;
    }
    bytes as f64 / (millis as f64 / 1000.0)
}
