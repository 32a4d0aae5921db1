//! Decoded audio segments and the PCM handle the CPAL sink plays.

use std::fmt;

/// Identity of one play request issued to a sink.
///
/// A fresh token is minted for every request, so a playback-ended signal for a
/// request that was since re-issued or dropped can be recognized as stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackToken(pub u64);

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One decoded, independently playable chunk of audio.
///
/// `handle` and `duration` never change after creation. `timestamp` is the start
/// offset on the current epoch's logical timeline and is rewritten on re-anchor.
#[derive(Debug)]
pub struct Segment<H> {
    pub(crate) handle: H,
    pub(crate) duration: f64,
    pub(crate) timestamp: f64,
    /// Outstanding play request, if the segment is currently scheduled.
    pub(crate) token: Option<PlaybackToken>,
}

impl<H> Segment<H> {
    /// Create an unscheduled segment starting at `timestamp` seconds.
    pub fn new(handle: H, duration: f64, timestamp: f64) -> Self {
        Self {
            handle,
            duration: duration.max(0.0),
            timestamp,
            token: None,
        }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Start offset on the current epoch's logical timeline, in seconds.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Logical end of the segment (`timestamp + duration`).
    pub fn end(&self) -> f64 {
        self.timestamp + self.duration
    }

    pub fn token(&self) -> Option<PlaybackToken> {
        self.token
    }
}

/// Interleaved `f32` PCM produced by the decoder.
///
/// Samples are stored interleaved:
/// `frame0[ch0], frame0[ch1], ..., frame1[ch0], frame1[ch1], ...`
#[derive(Clone, Debug, PartialEq)]
pub struct PcmBuffer {
    sample_rate: u32,
    channels: usize,
    samples: Vec<f32>,
}

impl PcmBuffer {
    /// Wrap interleaved samples. A trailing partial frame is dropped.
    pub fn new(sample_rate: u32, channels: usize, mut samples: Vec<f32>) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Duration in seconds (`0.0` for a zero sample rate).
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Read the sample for output channel `dst_ch` of `frame`, mapping channel layouts.
    ///
    /// Mapping rules:
    /// - mono → stereo: duplicate channel 0
    /// - stereo → mono: average L/R
    /// - same layout: pass-through
    /// - other layouts: clamp to the available channels
    pub fn sample_mapped(&self, frame: usize, dst_channels: usize, dst_ch: usize) -> f32 {
        let start = frame * self.channels;
        if start >= self.samples.len() {
            return 0.0;
        }
        let get = |ch: usize| -> f32 {
            if ch < self.channels {
                self.samples[start + ch]
            } else {
                0.0
            }
        };

        match (self.channels, dst_channels) {
            (1, 1) => get(0),
            (2, 2) => get(dst_ch.min(1)),
            (2, 1) => 0.5 * (get(0) + get(1)),
            (1, 2) => get(0),
            _ => get(dst_ch.min(self.channels.saturating_sub(1))),
        }
    }
}
