//! Bandwidth estimation and tier-based encoding preference.
//!
//! Tracks throughput over a rolling history of samples and picks an
//! encoding-preference vector from one of three hand-curated tiers, so the
//! client can trade compression effort for latency as the link quality
//! changes. A tier change is surfaced so the caller can issue one
//! `SetEncodings` with the new preference order.

use std::time::Instant;

use rfb_encodings::{
    ENCODING_COPY_RECT, ENCODING_CORRE, ENCODING_DESKTOP_NAME, ENCODING_DESKTOP_SIZE,
    ENCODING_HEXTILE, ENCODING_LAST_RECT, ENCODING_RAW, ENCODING_RRE, ENCODING_TIGHT,
    ENCODING_TRLE, ENCODING_WMVI, ENCODING_ZLIB, ENCODING_ZLIBHEX, ENCODING_ZRLE,
};

/// Number of samples kept in the bandwidth history ring.
const HISTORY_LEN: usize = 16;

/// A sample is rolled into a new ring slot once the running byte count for
/// the current slot (or the update about to be added) exceeds this many
/// bytes.
const SAMPLE_ROLLOVER_BYTES: u64 = 20_000;

/// Below this estimated bytes/sec, prefer the low-bandwidth tier.
const LOW_BANDWIDTH_THRESHOLD: f64 = 10_000.0;

/// Below this estimated bytes/sec (and at or above the low threshold),
/// prefer the mid-bandwidth tier. At or above it, prefer high-bandwidth.
const MID_BANDWIDTH_THRESHOLD: f64 = 100_000.0;

/// Bandwidth tier, used to pick an encoding-preference vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthTier {
    /// Link is slow; prefer compact encodings even at higher CPU cost.
    Low,
    /// Link is middling; still favour compression but less aggressively.
    Mid,
    /// Link is fast; prefer cheap-to-encode formats over compact ones.
    High,
}

impl BandwidthTier {
    fn from_estimate(bytes_per_sec: f64) -> Self {
        if bytes_per_sec < LOW_BANDWIDTH_THRESHOLD {
            Self::Low
        } else if bytes_per_sec < MID_BANDWIDTH_THRESHOLD {
            Self::Mid
        } else {
            Self::High
        }
    }

    /// The encoding-preference vector for this tier, most-preferred first.
    #[must_use]
    pub fn encodings(self) -> &'static [i32] {
        match self {
            Self::Low => &[
                ENCODING_COPY_RECT,
                ENCODING_TIGHT,
                ENCODING_ZRLE,
                ENCODING_ZLIBHEX,
                ENCODING_ZLIB,
                ENCODING_TRLE,
                ENCODING_HEXTILE,
                ENCODING_RRE,
                ENCODING_CORRE,
                ENCODING_RAW,
                ENCODING_DESKTOP_SIZE,
                ENCODING_LAST_RECT,
                ENCODING_DESKTOP_NAME,
                ENCODING_WMVI,
            ],
            Self::Mid => &[
                ENCODING_COPY_RECT,
                ENCODING_ZRLE,
                ENCODING_TIGHT,
                ENCODING_ZLIBHEX,
                ENCODING_ZLIB,
                ENCODING_TRLE,
                ENCODING_HEXTILE,
                ENCODING_RRE,
                ENCODING_CORRE,
                ENCODING_RAW,
                ENCODING_DESKTOP_SIZE,
                ENCODING_LAST_RECT,
                ENCODING_DESKTOP_NAME,
                ENCODING_WMVI,
            ],
            Self::High => &[
                ENCODING_COPY_RECT,
                ENCODING_HEXTILE,
                ENCODING_TRLE,
                ENCODING_RRE,
                ENCODING_CORRE,
                ENCODING_ZLIB,
                ENCODING_ZLIBHEX,
                ENCODING_ZRLE,
                ENCODING_TIGHT,
                ENCODING_RAW,
                ENCODING_DESKTOP_SIZE,
                ENCODING_LAST_RECT,
                ENCODING_DESKTOP_NAME,
                ENCODING_WMVI,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    bytes: u64,
    seconds: f64,
}

/// Estimates throughput from recent `FramebufferUpdate` traffic and tracks
/// which bandwidth tier is currently selected.
///
/// Samples are measured with [`Instant`], never wall-clock time, so the
/// estimate can't be skewed by a clock step.
pub struct BandwidthGovernor {
    history: [Sample; HISTORY_LEN],
    index: usize,
    total_bytes: u64,
    total_seconds: f64,
    current_tier: Option<BandwidthTier>,
    update_start: Option<Instant>,
    update_bytes: u64,
}

impl Default for BandwidthGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl BandwidthGovernor {
    /// Creates a governor with an empty history. No tier is selected until
    /// the first sample completes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: [Sample::default(); HISTORY_LEN],
            index: 0,
            total_bytes: 0,
            total_seconds: 0.0,
            current_tier: None,
            update_start: None,
            update_bytes: 0,
        }
    }

    /// Marks the start of a `FramebufferUpdate` read, beginning a new sample.
    pub fn start_update(&mut self) {
        self.update_start = Some(Instant::now());
        self.update_bytes = 0;
    }

    /// Accumulates bytes consumed while decoding the current update.
    pub fn record_bytes(&mut self, bytes: u64) {
        self.update_bytes += bytes;
    }

    /// Finishes the current sample, folding it into the history ring, and
    /// returns `Some(tier)` if the bandwidth tier changed as a result.
    ///
    /// Returns `None` if `start_update` was never called, or if the tier is
    /// unchanged.
    pub fn end_update(&mut self) -> Option<BandwidthTier> {
        let start = self.update_start.take()?;
        let elapsed = start.elapsed().as_secs_f64();
        let bytes = self.update_bytes;
        self.update_bytes = 0;

        let current = &self.history[self.index];
        if bytes > SAMPLE_ROLLOVER_BYTES || current.bytes + bytes > SAMPLE_ROLLOVER_BYTES {
            self.index = (self.index + 1) % HISTORY_LEN;
            let evicted = self.history[self.index];
            self.total_bytes -= evicted.bytes;
            self.total_seconds -= evicted.seconds;
            self.history[self.index] = Sample::default();
        }

        let slot = &mut self.history[self.index];
        slot.bytes += bytes;
        slot.seconds += elapsed;
        self.total_bytes += bytes;
        self.total_seconds += elapsed;

        let estimate = self.estimate();
        let tier = BandwidthTier::from_estimate(estimate);

        if self.current_tier != Some(tier) {
            self.current_tier = Some(tier);
            Some(tier)
        } else {
            None
        }
    }

    /// Current estimated throughput in bytes/sec (`Σbytes / Σseconds`).
    ///
    /// Returns 0.0 if no time has elapsed yet.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        if self.total_seconds > 0.0 {
            self.total_bytes as f64 / self.total_seconds
        } else {
            0.0
        }
    }

    /// The currently selected tier, or `None` before the first sample completes.
    #[must_use]
    pub fn tier(&self) -> Option<BandwidthTier> {
        self.current_tier
    }

    /// Sum of bytes across all retained samples.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_tier_encodings_lead_with_copyrect_and_tight() {
        let enc = BandwidthTier::Low.encodings();
        assert_eq!(enc[0], ENCODING_COPY_RECT);
        assert_eq!(enc[1], ENCODING_TIGHT);
        assert_eq!(enc[2], ENCODING_ZRLE);
    }

    #[test]
    fn mid_tier_swaps_zrle_ahead_of_tight() {
        let enc = BandwidthTier::Mid.encodings();
        assert_eq!(enc[0], ENCODING_COPY_RECT);
        assert_eq!(enc[1], ENCODING_ZRLE);
        assert_eq!(enc[2], ENCODING_TIGHT);
    }

    #[test]
    fn high_tier_leads_with_fast_encodings() {
        let enc = BandwidthTier::High.encodings();
        assert_eq!(enc[0], ENCODING_COPY_RECT);
        assert_eq!(enc[1], ENCODING_HEXTILE);
        assert_eq!(enc[2], ENCODING_TRLE);
    }

    #[test]
    fn tier_thresholds_match_reference_table() {
        assert_eq!(BandwidthTier::from_estimate(5_000.0), BandwidthTier::Low);
        assert_eq!(BandwidthTier::from_estimate(50_000.0), BandwidthTier::Mid);
        assert_eq!(BandwidthTier::from_estimate(500_000.0), BandwidthTier::High);
    }

    #[test]
    fn no_tier_before_first_sample() {
        let gov = BandwidthGovernor::new();
        assert_eq!(gov.tier(), None);
        assert_eq!(gov.estimate(), 0.0);
    }

    #[test]
    fn completing_a_sample_without_start_is_a_noop() {
        let mut gov = BandwidthGovernor::new();
        assert_eq!(gov.end_update(), None);
    }

    #[test]
    fn sample_accumulates_and_reports_tier_change() {
        let mut gov = BandwidthGovernor::new();
        gov.start_update();
        gov.record_bytes(1024);
        let changed = gov.end_update();
        // First completed sample always reports a tier (None -> Some).
        assert!(changed.is_some());
        assert_eq!(gov.tier(), changed);
        assert_eq!(gov.total_bytes(), 1024);
    }

    #[test]
    fn repeated_samples_in_same_tier_report_no_change() {
        let mut gov = BandwidthGovernor::new();
        gov.start_update();
        gov.record_bytes(100);
        let first = gov.end_update();
        assert!(first.is_some());

        gov.start_update();
        gov.record_bytes(100);
        let second = gov.end_update();
        assert_eq!(second, None, "tier shouldn't flap on a near-identical sample");
    }

    #[test]
    fn history_total_equals_sum_of_samples() {
        let mut gov = BandwidthGovernor::new();
        for _ in 0..HISTORY_LEN {
            gov.start_update();
            gov.record_bytes(500);
            gov.end_update();
        }
        let sum: u64 = gov.history.iter().map(|s| s.bytes).sum();
        assert_eq!(sum, gov.total_bytes());
    }
}
