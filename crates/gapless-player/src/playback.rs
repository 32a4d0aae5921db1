//! CPAL-backed [`AudioSink`].
//!
//! The output callback renders a small mixer of voices, one per play request, into
//! the device buffer. The hardware clock is the number of frames the callback has
//! rendered, so it stands still while the sink is suspended.
//!
//! ## Real-time constraints
//! The callback takes one short lock on the voice list and never waits on a channel.
//! With nothing to play it writes silence.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::OutputConfig;
use crate::device::{self, OutputSelection};
use crate::error::{SchedulingRejected, SinkError};
use crate::segment::{PcmBuffer, PlaybackToken};
use crate::sink::{AudioSink, EndedCallback};

/// One play request: a buffer, the device frame it starts at, and a read position.
#[derive(Debug)]
struct Voice {
    token: PlaybackToken,
    pcm: Arc<PcmBuffer>,
    start_frame: u64,
    pos: usize,
}

/// Voices waiting for or in playback.
#[derive(Debug, Default)]
struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    fn add(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    fn remove(&mut self, token: PlaybackToken) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.token != token);
        self.voices.len() != before
    }

    /// Mix every voice into `out` (interleaved, `channels` wide) for the frames starting
    /// at device frame `clock`. Returns the tokens of voices that ran out.
    fn render(&mut self, clock: u64, out: &mut [f32], channels: usize, gain: f32) -> Vec<PlaybackToken> {
        out.fill(0.0);
        let frames = out.len() / channels.max(1);
        let mut ended = Vec::new();

        self.voices.retain_mut(|voice| {
            let skip = voice.start_frame.saturating_sub(clock);
            if skip >= frames as u64 {
                return true;
            }
            let first = skip as usize;
            let available = voice.pcm.frames().saturating_sub(voice.pos);
            let n = available.min(frames - first);
            for i in 0..n {
                let base = (first + i) * channels;
                for ch in 0..channels {
                    out[base + ch] += gain * voice.pcm.sample_mapped(voice.pos + i, channels, ch);
                }
            }
            voice.pos += n;
            if voice.pos >= voice.pcm.frames() {
                ended.push(voice.token);
                false
            } else {
                true
            }
        });
        ended
    }
}

/// State shared between the sink and its output callback.
struct Shared {
    clock_frames: AtomicU64,
    gain_bits: AtomicU32,
    suspended: AtomicBool,
    mixer: Mutex<Mixer>,
    on_ended: Mutex<EndedCallback>,
}

impl Shared {
    fn new(on_ended: EndedCallback) -> Self {
        Self {
            clock_frames: AtomicU64::new(0),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            // Blocked until the first resume.
            suspended: AtomicBool::new(true),
            mixer: Mutex::new(Mixer::default()),
            on_ended: Mutex::new(on_ended),
        }
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    /// Render one callback's worth of frames and advance the clock.
    ///
    /// Outputs silence without advancing while suspended or when the mixer lock is
    /// unavailable.
    fn render(&self, out: &mut [f32], channels: usize) {
        if self.suspended.load(Ordering::Relaxed) {
            out.fill(0.0);
            return;
        }
        let clock = self.clock_frames.load(Ordering::Acquire);
        let ended = match self.mixer.lock() {
            Ok(mut mixer) => mixer.render(clock, out, channels, self.gain()),
            Err(_) => {
                out.fill(0.0);
                return;
            }
        };
        let frames = out.len() / channels.max(1);
        self.clock_frames.fetch_add(frames as u64, Ordering::Release);

        if !ended.is_empty() {
            if let Ok(cb) = self.on_ended.lock() {
                for token in ended {
                    cb(token);
                }
            }
        }
    }
}

/// Audio sink driving one CPAL output stream.
pub struct CpalSink {
    stream: Option<cpal::Stream>,
    shared: Arc<Shared>,
    sample_rate: u32,
    base_latency: Option<f64>,
}

impl CpalSink {
    /// Open the output described by `config`; `on_ended` receives the token of every
    /// play request that runs to completion.
    ///
    /// The stream starts suspended, rendering silence with the clock stopped.
    pub fn open(config: &OutputConfig, on_ended: EndedCallback) -> Result<Self> {
        let host = cpal::default_host();
        let selection = device::select_output(&host, config)?;
        Self::open_selection(selection, on_ended)
    }

    pub fn open_selection(selection: OutputSelection, on_ended: EndedCallback) -> Result<Self> {
        let sample_rate = selection.stream_config.sample_rate;
        if sample_rate == 0 {
            return Err(anyhow!("device reports a zero sample rate"));
        }
        let base_latency = selection
            .buffer_frames()
            .map(|frames| frames as f64 / sample_rate as f64);

        let shared = Arc::new(Shared::new(on_ended));
        let stream = build_output_stream(
            &selection.device,
            &selection.stream_config,
            selection.sample_format,
            shared.clone(),
        )?;
        stream.play().context("start output stream")?;

        tracing::info!(
            device = %selection.name,
            rate_hz = sample_rate,
            channels = selection.stream_config.channels,
            sample_format = ?selection.sample_format,
            buffer_size = ?selection.stream_config.buffer_size,
            "output stream opened"
        );

        Ok(Self {
            stream: Some(stream),
            shared,
            sample_rate,
            base_latency,
        })
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl AudioSink for CpalSink {
    type Handle = Arc<PcmBuffer>;

    fn current_time(&self) -> f64 {
        self.shared.clock_frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn base_latency(&self) -> Option<f64> {
        self.base_latency
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(
        &mut self,
        token: PlaybackToken,
        handle: &Self::Handle,
        when: f64,
        offset: f64,
    ) -> Result<(), SchedulingRejected> {
        if self.is_closed() {
            return Err(SchedulingRejected::Closed);
        }
        if handle.sample_rate() != self.sample_rate {
            return Err(SchedulingRejected::RateMismatch {
                buffer_hz: handle.sample_rate(),
                output_hz: self.sample_rate,
            });
        }
        if !when.is_finite() || !offset.is_finite() {
            return Err(SchedulingRejected::NotReady);
        }

        let rate = self.sample_rate as f64;
        let now = self.shared.clock_frames.load(Ordering::Acquire);
        let start_frame = ((when.max(0.0) * rate).round() as u64).max(now);
        let pos = (offset.max(0.0) * rate).round() as usize;

        let mut mixer = self
            .shared
            .mixer
            .lock()
            .map_err(|_| SchedulingRejected::NotReady)?;
        mixer.add(Voice {
            token,
            pcm: handle.clone(),
            start_frame,
            pos,
        });
        tracing::trace!(token = %token, start_frame, pos, "voice queued");
        Ok(())
    }

    fn detach(&mut self, token: PlaybackToken) {
        if let Ok(mut mixer) = self.shared.mixer.lock() {
            mixer.remove(token);
        }
    }

    fn set_gain(&mut self, gain: f32) {
        self.shared.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    fn suspend(&mut self) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.shared.suspended.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SinkError> {
        let Some(stream) = &self.stream else {
            return Err(SinkError::Closed);
        };
        stream
            .play()
            .map_err(|e| SinkError::Device(e.to_string()))?;
        self.shared.suspended.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.shared.suspended.store(true, Ordering::Relaxed);
            if let Err(e) = stream.pause() {
                tracing::debug!("pause on close failed: {e}");
            }
            drop(stream);
            if let Ok(mut mixer) = self.shared.mixer.lock() {
                mixer.voices.clear();
            }
            tracing::debug!("output stream closed");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: Arc<Shared>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder: renders the mixer as `f32` then converts.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<Shared>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if scratch.len() != data.len() {
                scratch.resize(data.len(), 0.0);
            }
            shared.render(&mut scratch, channels);
            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
