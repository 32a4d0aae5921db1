//! Ordered queue of decoded segments.
//!
//! Insertion order is logical-timeline order: `timestamp` is non-decreasing from
//! front to back. The queue is mutated only by:
//! - append (decode pipeline)
//! - pop by playback token (playback-ended notification)
//! - prefix drop (seek trim, re-anchor)

use std::collections::VecDeque;

use crate::segment::{PlaybackToken, Segment};

/// FIFO of segments owned by the scheduler until played or dropped.
#[derive(Debug)]
pub struct SegmentQueue<H> {
    segments: VecDeque<Segment<H>>,
}

impl<H> Default for SegmentQueue<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> SegmentQueue<H> {
    pub fn new() -> Self {
        Self {
            segments: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn front(&self) -> Option<&Segment<H>> {
        self.segments.front()
    }

    pub fn back(&self) -> Option<&Segment<H>> {
        self.segments.back()
    }

    pub(crate) fn back_mut(&mut self) -> Option<&mut Segment<H>> {
        self.segments.back_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment<H>> {
        self.segments.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Segment<H>> {
        self.segments.iter_mut()
    }

    /// Append at the tail of the timeline.
    pub fn push_back(&mut self, segment: Segment<H>) {
        debug_assert!(
            self.segments
                .back()
                .is_none_or(|last| last.timestamp <= segment.timestamp),
            "segment timestamps must be non-decreasing"
        );
        self.segments.push_back(segment);
    }

    pub fn pop_front(&mut self) -> Option<Segment<H>> {
        self.segments.pop_front()
    }

    /// Remove and return the first `count` segments (fewer if the queue is shorter).
    pub fn drop_front(&mut self, count: usize) -> Vec<Segment<H>> {
        let count = count.min(self.segments.len());
        self.segments.drain(..count).collect()
    }

    /// Remove the segment whose outstanding play request carries `token`.
    ///
    /// In normal operation this is the front entry; stale tokens match nothing.
    pub fn remove_by_token(&mut self, token: PlaybackToken) -> Option<Segment<H>> {
        let idx = self
            .segments
            .iter()
            .position(|s| s.token == Some(token))?;
        if idx != 0 {
            tracing::debug!(token = %token, index = idx, "playback ended out of queue order");
        }
        self.segments.remove(idx)
    }

    /// Number of leading segments a seek to `target_ms` discards.
    ///
    /// Finds the first segment that starts strictly after the target and keeps the
    /// one just before it, which straddles the target and is resumed mid-segment.
    /// When the first segment already starts after the target nothing is dropped.
    /// When no segment starts after the target, everything but the last entry goes.
    pub fn trim_count(&self, target_ms: f64) -> usize {
        let boundary = self
            .segments
            .iter()
            .position(|s| s.timestamp * 1000.0 > target_ms)
            .unwrap_or(self.segments.len());
        boundary.saturating_sub(1)
    }

    /// Number of leading segments that end at or before `target` seconds.
    pub fn consumed_count(&self, target: f64) -> usize {
        self.segments
            .iter()
            .take_while(|s| s.end() <= target)
            .count()
    }

    /// Sum of the durations of every queued segment.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    /// Remove every segment.
    pub fn clear(&mut self) -> Vec<Segment<H>> {
        self.segments.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(durations: &[f64]) -> SegmentQueue<usize> {
        let mut q = SegmentQueue::new();
        let mut ts = 0.0;
        for (i, d) in durations.iter().enumerate() {
            q.push_back(Segment::new(i, *d, ts));
            ts += d;
        }
        q
    }

    #[test]
    fn trim_count_keeps_straddling_segment() {
        let q = queue_of(&[2.0, 2.0, 2.0]);
        // Target at 3s lies inside the second segment.
        assert_eq!(q.trim_count(3000.0), 1);
    }

    #[test]
    fn trim_count_first_segment_never_dropped_when_it_matches() {
        let mut q = SegmentQueue::new();
        q.push_back(Segment::new(0usize, 2.0, 5.0));
        q.push_back(Segment::new(1usize, 2.0, 7.0));
        assert_eq!(q.trim_count(1000.0), 0);
    }

    #[test]
    fn trim_count_at_exact_boundary_keeps_segment_starting_there() {
        let q = queue_of(&[2.0, 2.0, 2.0]);
        assert_eq!(q.trim_count(2000.0), 1);
    }

    #[test]
    fn trim_count_past_every_start_keeps_last() {
        let q = queue_of(&[2.0, 2.0, 2.0]);
        assert_eq!(q.trim_count(60_000.0), 2);
        let single = queue_of(&[5.0]);
        assert_eq!(single.trim_count(3000.0), 0);
    }

    #[test]
    fn trim_count_empty_queue_is_zero() {
        let q: SegmentQueue<usize> = SegmentQueue::new();
        assert_eq!(q.trim_count(1000.0), 0);
    }

    #[test]
    fn consumed_count_stops_at_first_unfinished() {
        let q = queue_of(&[1.0, 1.0, 1.0]);
        assert_eq!(q.consumed_count(0.0), 0);
        assert_eq!(q.consumed_count(1.0), 1);
        assert_eq!(q.consumed_count(2.5), 2);
        assert_eq!(q.consumed_count(10.0), 3);
    }

    #[test]
    fn drop_front_returns_prefix_in_order() {
        let mut q = queue_of(&[1.0, 1.0, 1.0]);
        let dropped = q.drop_front(2);
        assert_eq!(dropped.iter().map(|s| s.handle).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.front().map(|s| s.handle), Some(2));
        assert!(q.drop_front(5).len() == 1 && q.is_empty());
    }

    #[test]
    fn remove_by_token_ignores_stale_tokens() {
        let mut q = queue_of(&[1.0, 1.0]);
        for (i, s) in q.iter_mut().enumerate() {
            s.token = Some(PlaybackToken(10 + i as u64));
        }
        assert!(q.remove_by_token(PlaybackToken(3)).is_none());
        assert_eq!(q.remove_by_token(PlaybackToken(10)).map(|s| s.handle), Some(0));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn total_duration_sums_segments() {
        let q = queue_of(&[0.5, 1.25, 2.0]);
        assert_eq!(q.total_duration(), 3.75);
    }
}
