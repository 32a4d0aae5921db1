//! Mapping between the hardware clock and the logical timeline.
//!
//! An epoch is the span between re-anchors. Within one epoch the segment at
//! epoch-relative position `t` sounds at hardware time `anchor + t`, and the
//! caller-visible position is `skimmed + t`.

/// Lead-in before the first sample of a new epoch may sound.
///
/// Gives the segment `duration` seconds plus the output latency to queue on the
/// device before its deadline. When the sink reports no (or a zero) base latency,
/// `fallback_frames / sample_rate` is used instead.
pub fn lead_in(duration: f64, base_latency: Option<f64>, fallback_frames: u32, sample_rate: u32) -> f64 {
    let latency = match base_latency {
        Some(l) if l.is_finite() && l > 0.0 => l,
        _ if sample_rate > 0 => fallback_frames as f64 / sample_rate as f64,
        _ => 0.0,
    };
    duration.max(0.0) + latency
}

/// Scheduling state of the current epoch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Epoch {
    /// Hardware instant of epoch-relative time zero; `None` until established.
    anchor: Option<f64>,
    /// Total duration scheduled (or held) in this epoch.
    scheduled: f64,
    /// Epoch-relative position at which sound begins (in-segment resume offset).
    start_offset: f64,
    /// Logical time elided before this epoch's origin.
    skimmed: f64,
}

impl Epoch {
    pub fn anchor(&self) -> Option<f64> {
        self.anchor
    }

    /// Cumulative scheduled duration of the current epoch.
    pub fn scheduled(&self) -> f64 {
        self.scheduled
    }

    pub fn skimmed(&self) -> f64 {
        self.skimmed
    }

    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    /// Drop the anchor and the cumulative total, keeping the skimmed offset.
    pub fn clear(&mut self) {
        self.anchor = None;
        self.scheduled = 0.0;
        self.start_offset = 0.0;
    }

    /// Start a new epoch whose origin is logical time `origin`.
    pub fn restart_at(&mut self, origin: f64) {
        self.clear();
        self.skimmed = origin;
    }

    /// Establish the anchor unless one exists; returns the anchor in effect.
    pub fn ensure_anchor(&mut self, now: f64, lead_in: f64) -> f64 {
        *self.anchor.get_or_insert_with(|| {
            let anchor = now + lead_in;
            tracing::debug!(now, anchor, "epoch anchored");
            anchor
        })
    }

    /// Anchor the epoch so that epoch position `start_offset` sounds `lead_in` from now.
    pub fn anchor_resuming_at(&mut self, now: f64, lead_in: f64, start_offset: f64) -> f64 {
        let start_offset = start_offset.max(0.0);
        let anchor = now + lead_in - start_offset;
        self.anchor = Some(anchor);
        self.start_offset = start_offset;
        tracing::debug!(now, anchor, start_offset, "epoch re-anchored");
        anchor
    }

    /// Reserve `duration` seconds at the tail; returns the epoch position it starts at.
    pub fn reserve(&mut self, duration: f64) -> f64 {
        let at = self.scheduled;
        self.scheduled += duration.max(0.0);
        at
    }

    /// Hardware instant at which the scheduled material runs out, if anchored.
    pub fn scheduled_end(&self) -> Option<f64> {
        self.anchor.map(|a| a + self.scheduled)
    }

    /// Caller-visible logical position at hardware time `now`.
    ///
    /// Reads the resume point until the anchor's first sample is due and holds at the
    /// end of scheduled material during an underrun, so the value never moves backwards.
    pub fn position(&self, now: f64) -> f64 {
        let Some(anchor) = self.anchor else {
            return self.skimmed + self.start_offset;
        };
        let upper = self.scheduled.max(self.start_offset);
        self.skimmed + (now - anchor).clamp(self.start_offset, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_in_prefers_reported_latency() {
        assert_eq!(lead_in(2.0, Some(0.25), 128, 48_000), 2.25);
    }

    #[test]
    fn lead_in_falls_back_to_frame_estimate() {
        let expected = 2.0 + 128.0 / 48_000.0;
        assert_eq!(lead_in(2.0, None, 128, 48_000), expected);
        assert_eq!(lead_in(2.0, Some(0.0), 128, 48_000), expected);
        assert_eq!(lead_in(2.0, Some(f64::NAN), 128, 48_000), expected);
    }

    #[test]
    fn lead_in_zero_rate_has_no_latency() {
        assert_eq!(lead_in(1.0, None, 128, 0), 1.0);
    }

    #[test]
    fn ensure_anchor_only_anchors_once() {
        let mut epoch = Epoch::default();
        assert_eq!(epoch.ensure_anchor(10.0, 2.0), 12.0);
        assert_eq!(epoch.ensure_anchor(50.0, 2.0), 12.0);
    }

    #[test]
    fn reserve_accumulates() {
        let mut epoch = Epoch::default();
        assert_eq!(epoch.reserve(2.0), 0.0);
        assert_eq!(epoch.reserve(1.5), 2.0);
        assert_eq!(epoch.scheduled(), 3.5);
        epoch.clear();
        assert_eq!(epoch.scheduled(), 0.0);
        assert!(epoch.anchor().is_none());
    }

    #[test]
    fn position_is_clamped_to_scheduled_window() {
        let mut epoch = Epoch::default();
        epoch.restart_at(3.0);
        epoch.reserve(5.0);
        epoch.anchor_resuming_at(100.0, 5.0, 1.0);
        // Anchor = 104; sound starts at 105 from epoch position 1.0.
        assert_eq!(epoch.position(100.0), 4.0);
        assert_eq!(epoch.position(105.0), 4.0);
        assert_eq!(epoch.position(107.0), 6.0);
        assert_eq!(epoch.position(200.0), 8.0);
    }

    #[test]
    fn position_without_anchor_reports_origin() {
        let mut epoch = Epoch::default();
        epoch.restart_at(7.5);
        assert_eq!(epoch.position(1000.0), 7.5);
    }

    #[test]
    fn position_never_decreases_as_clock_advances() {
        let mut epoch = Epoch::default();
        epoch.reserve(4.0);
        epoch.ensure_anchor(0.0, 2.0);
        let mut last = f64::MIN;
        for step in 0..100 {
            let p = epoch.position(step as f64 * 0.1);
            assert!(p >= last);
            last = p;
        }
    }
}
