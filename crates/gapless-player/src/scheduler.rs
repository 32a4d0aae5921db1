//! Gapless segment scheduler.
//!
//! Owns the segment queue, the epoch anchor and the output sink, and decides where
//! on the hardware clock each decoded segment plays. Every method runs on one
//! serial context: decoder completions and playback-ended notifications are fed
//! back in through [`Scheduler::finish_decode`] and [`Scheduler::segment_ended`]
//! (see [`crate::player`] for the threaded wrapper).
//!
//! ## Timeline
//! Within one epoch the segment at epoch position `t` starts at hardware time
//! `anchor + t`, where `t` is the cumulative duration of the segments before it.
//! Each start is the exact end of its predecessor, so queued segments sound with no
//! gap and no overlap.
//!
//! ## Invalid states
//! Calls that make no sense in the current state (unblocking twice, anything after
//! `destroy`) are silently ignored.

use gapless_types::PlaybackState;

use crate::anchor::{Epoch, lead_in};
use crate::config::SchedulerConfig;
use crate::decode::{DecodeAttempt, DecodePipeline, Decoded};
use crate::error::{DecodeError, SinkError};
use crate::events::{DecodeEvent, EventListeners, Listener, ListenerId};
use crate::queue::SegmentQueue;
use crate::segment::{PlaybackToken, Segment};
use crate::sink::AudioSink;

/// Scheduling engine over an [`AudioSink`].
pub struct Scheduler<S: AudioSink> {
    config: SchedulerConfig,
    state: PlaybackState,
    /// `None` once destroyed.
    sink: Option<S>,
    queue: SegmentQueue<S::Handle>,
    epoch: Epoch,
    decode: DecodePipeline,
    available: f64,
    blocked_cursor_ms: f64,
    volume: f32,
    muted: bool,
    listeners: EventListeners,
    next_token: u64,
}

impl<S: AudioSink> Scheduler<S> {
    /// Create a blocked scheduler that owns `sink` until [`destroy`](Self::destroy).
    pub fn new(config: SchedulerConfig, mut sink: S) -> Self {
        let volume = sanitize_volume(config.volume);
        let muted = config.muted;
        sink.set_gain(effective_gain(volume, muted));
        Self {
            config,
            state: PlaybackState::Blocked,
            sink: Some(sink),
            queue: SegmentQueue::new(),
            epoch: Epoch::default(),
            decode: DecodePipeline::default(),
            available: 0.0,
            blocked_cursor_ms: 0.0,
            volume,
            muted,
            listeners: EventListeners::new(),
            next_token: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn queue(&self) -> &SegmentQueue<S::Handle> {
        &self.queue
    }

    pub fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    /// Register a decode listener. Returns `None` once destroyed.
    pub fn subscribe(&mut self, listener: Listener) -> Option<ListenerId> {
        if self.state == PlaybackState::Destroyed {
            return None;
        }
        Some(self.listeners.subscribe(listener))
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Accumulate `bytes`; returns the decoder attempt to run, if one should start now.
    pub fn decode(&mut self, bytes: &[u8]) -> Option<DecodeAttempt> {
        if self.state == PlaybackState::Destroyed {
            return None;
        }
        self.decode.push(bytes)
    }

    /// Deliver the result of decoder attempt `attempt`.
    ///
    /// Returns a follow-up attempt when bytes arrived while this one was running.
    /// Completions after `destroy`, or for attempts that are not in flight, are ignored.
    pub fn finish_decode(
        &mut self,
        attempt: u64,
        result: Result<Decoded<S::Handle>, DecodeError>,
    ) -> Option<DecodeAttempt> {
        if self.state == PlaybackState::Destroyed {
            return None;
        }
        if !self.decode.complete(attempt, result.is_ok()) {
            tracing::trace!(attempt, "ignoring stale decode completion");
            return None;
        }

        match result {
            Ok(decoded) => {
                self.append_segment(decoded);
                self.listeners.emit(&DecodeEvent::Succeeded);
            }
            Err(reason) => {
                tracing::debug!(
                    attempt,
                    pending_bytes = self.decode.pending().len(),
                    error = %reason,
                    "decode failed; keeping bytes for retry"
                );
                self.listeners.emit(&DecodeEvent::Failed { reason });
            }
        }

        self.decode.next_attempt()
    }

    /// Playback of the request carrying `token` reached its end.
    pub fn segment_ended(&mut self, token: PlaybackToken) {
        if self.state == PlaybackState::Destroyed {
            return;
        }
        let Some(segment) = self.queue.remove_by_token(token) else {
            tracing::trace!(token = %token, "ignoring stale playback-ended signal");
            return;
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.detach(token);
        }
        tracing::trace!(
            token = %token,
            duration = segment.duration,
            queued = self.queue.len(),
            "segment finished"
        );
    }

    /// Leave the blocked state and start playback from `offset_ms` on the logical timeline.
    ///
    /// Resumes the device, trims segments that lie entirely before the offset, and
    /// re-schedules every remaining segment against a fresh anchor.
    pub fn unblock(&mut self, offset_ms: f64) {
        if self.state != PlaybackState::Blocked {
            return;
        }
        let offset_ms = sanitize_ms(offset_ms);

        self.state = PlaybackState::Running;
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.resume() {
                tracing::warn!("resume on unblock failed: {e}");
            }
        }

        self.trim(offset_ms);
        let timeline_end = self.epoch.skimmed() + self.epoch.scheduled();
        self.epoch.clear();
        self.reschedule_all(offset_ms, timeline_end);

        tracing::info!(
            offset_ms,
            segments = self.queue.len(),
            scheduled = self.epoch.scheduled(),
            "playback unblocked"
        );
    }

    /// Record where playback should start once unblocked and drop the segments that
    /// lie entirely before that point.
    ///
    /// Only meaningful while blocked; ignored otherwise.
    pub fn set_blocked_time(&mut self, target_ms: f64) {
        if self.state != PlaybackState::Blocked {
            tracing::debug!(state = ?self.state, "set_blocked_time ignored outside blocked state");
            return;
        }
        self.trim(sanitize_ms(target_ms));
    }

    /// Logical playback position in seconds.
    pub fn current_time(&self) -> f64 {
        match self.state {
            PlaybackState::Blocked => self.blocked_cursor_ms / 1000.0,
            PlaybackState::Destroyed => 0.0,
            PlaybackState::Running | PlaybackState::Paused => match &self.sink {
                Some(sink) => self.epoch.position(sink.current_time()),
                None => 0.0,
            },
        }
    }

    /// Total decoded audio so far, in seconds.
    pub fn available_duration(&self) -> f64 {
        self.available
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        if self.state == PlaybackState::Destroyed {
            return;
        }
        self.volume = sanitize_volume(volume);
        self.apply_gain();
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.state == PlaybackState::Destroyed {
            return;
        }
        self.muted = muted;
        self.apply_gain();
    }

    /// Suspend the output device. Queue and anchor are left untouched.
    pub fn pause(&mut self) -> Result<(), SinkError> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        sink.suspend()?;
        if self.state == PlaybackState::Running {
            self.state = PlaybackState::Paused;
        }
        Ok(())
    }

    /// Resume the output device after [`pause`](Self::pause).
    pub fn resume(&mut self) -> Result<(), SinkError> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        sink.resume()?;
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Running;
        }
        Ok(())
    }

    /// Tear down: drop listeners, detach outstanding nodes, close the sink, and
    /// discard queued segments and pending bytes. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.state == PlaybackState::Destroyed {
            return;
        }
        self.listeners.clear();
        if let Some(mut sink) = self.sink.take() {
            for token in self.queue.iter().filter_map(|s| s.token) {
                sink.detach(token);
            }
            sink.close();
        }
        let dropped = self.queue.clear().len();
        self.decode.reset();
        self.epoch = Epoch::default();
        self.state = PlaybackState::Destroyed;
        tracing::info!(dropped_segments = dropped, "scheduler destroyed");
    }

    /// Whether a decoder attempt is outstanding.
    pub fn decode_in_flight(&self) -> bool {
        self.decode.in_flight().is_some()
    }

    /// Bytes accumulated but not yet decoded.
    pub fn pending_bytes(&self) -> usize {
        self.decode.pending().len()
    }

    fn apply_gain(&mut self) {
        let gain = effective_gain(self.volume, self.muted);
        if let Some(sink) = self.sink.as_mut() {
            sink.set_gain(gain);
        }
    }

    fn mint_token(next: &mut u64) -> PlaybackToken {
        let token = PlaybackToken(*next);
        *next += 1;
        token
    }

    /// Append a decoded segment at the tail of the current epoch and, unless blocked,
    /// schedule it right away.
    fn append_segment(&mut self, decoded: Decoded<S::Handle>) {
        let duration = if decoded.duration.is_finite() {
            decoded.duration.max(0.0)
        } else {
            0.0
        };

        if self.state.is_unblocked() {
            self.restart_epoch_if_drained();
        }

        let timestamp = self.epoch.reserve(duration);
        self.available += duration;
        self.queue
            .push_back(Segment::new(decoded.handle, duration, timestamp));

        if self.state.is_unblocked() {
            self.schedule_last();
        }
    }

    /// Start a new epoch when nothing is playing and the scheduled material already
    /// ran out; the next segment would otherwise be requested in the past.
    fn restart_epoch_if_drained(&mut self) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if self.queue.iter().any(|s| s.token.is_some()) {
            return;
        }
        let Some(end) = self.epoch.scheduled_end() else {
            return;
        };
        let now = sink.current_time();
        if end < now {
            // Whatever is still queued here was rejected by the sink and will never end.
            let stale = self.queue.clear().len();
            let origin = self.epoch.skimmed() + self.epoch.scheduled();
            tracing::info!(
                late_by = now - end,
                origin,
                stale,
                "playback underrun; starting new epoch"
            );
            self.epoch.restart_at(origin);
        }
    }

    /// Issue the play request for the segment at the back of the queue.
    fn schedule_last(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let Some(segment) = self.queue.back_mut() else {
            return;
        };

        let lead = lead_in(
            segment.duration,
            sink.base_latency(),
            self.config.fallback_latency_frames,
            sink.sample_rate(),
        );
        let anchor = self.epoch.ensure_anchor(sink.current_time(), lead);
        let when = anchor + segment.timestamp;
        let token = Self::mint_token(&mut self.next_token);

        // Best effort: a rejected request leaves a silent slot, never an error.
        match sink.play(token, &segment.handle, when, 0.0) {
            Ok(()) => segment.token = Some(token),
            Err(e) => tracing::debug!(when, error = %e, "play request rejected"),
        }
    }

    /// Drop queue-front segments that lie entirely before `target_ms`.
    fn trim(&mut self, target_ms: f64) {
        self.blocked_cursor_ms = target_ms;
        let count = self.queue.trim_count(target_ms);
        if count == 0 {
            return;
        }
        let dropped = self.queue.drop_front(count);
        if let Some(sink) = self.sink.as_mut() {
            for token in dropped.iter().filter_map(|s| s.token) {
                sink.detach(token);
            }
        }
        tracing::debug!(target_ms, dropped = count, remaining = self.queue.len(), "queue trimmed");
    }

    /// Re-issue every queued segment against a fresh anchor, resuming the first one
    /// at `offset_ms` on the logical timeline.
    ///
    /// Segments already consumed by the offset are dropped. Timestamps are rewritten
    /// to the new epoch; durations are untouched.
    fn reschedule_all(&mut self, offset_ms: f64, timeline_end: f64) {
        let skimmed = self.epoch.skimmed();
        let target = offset_ms / 1000.0 - skimmed;

        let consumed = self.queue.consumed_count(target);
        if consumed > 0 {
            let dropped = self.queue.drop_front(consumed);
            if let Some(sink) = self.sink.as_mut() {
                for token in dropped.iter().filter_map(|s| s.token) {
                    sink.detach(token);
                }
            }
            tracing::debug!(dropped = consumed, "dropped segments consumed by resume offset");
        }

        let Some((first_ts, first_duration)) =
            self.queue.front().map(|s| (s.timestamp, s.duration))
        else {
            self.epoch
                .restart_at(timeline_end.max(skimmed).max(offset_ms / 1000.0));
            return;
        };
        let start_offset = (target - first_ts).max(0.0);
        self.epoch.restart_at(skimmed + first_ts);

        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let lead = lead_in(
            first_duration,
            sink.base_latency(),
            self.config.fallback_latency_frames,
            sink.sample_rate(),
        );
        let anchor = self
            .epoch
            .anchor_resuming_at(sink.current_time(), lead, start_offset);

        let mut running = 0.0;
        for (i, segment) in self.queue.iter_mut().enumerate() {
            if let Some(old) = segment.token.take() {
                sink.detach(old);
            }
            let (when, offset) = if i == 0 {
                (anchor + start_offset, start_offset)
            } else {
                (anchor + running, 0.0)
            };
            let token = Self::mint_token(&mut self.next_token);
            match sink.play(token, &segment.handle, when, offset) {
                Ok(()) => segment.token = Some(token),
                Err(e) => tracing::debug!(when, offset, error = %e, "play request rejected"),
            }
            segment.timestamp = running;
            running += segment.duration;
        }
        self.epoch.reserve(running);
    }
}

impl<S: AudioSink> Drop for Scheduler<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Gain applied to the shared stage: silent when muted, the volume level otherwise.
pub fn effective_gain(volume: f32, muted: bool) -> f32 {
    if muted { 0.0 } else { volume }
}

fn sanitize_volume(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

fn sanitize_ms(ms: f64) -> f64 {
    if ms.is_finite() { ms.max(0.0) } else { 0.0 }
}
