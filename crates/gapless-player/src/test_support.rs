//! Fakes shared by unit tests.

use std::sync::{Arc, Mutex};

use crate::error::{SchedulingRejected, SinkError};
use crate::segment::PlaybackToken;
use crate::sink::AudioSink;

#[derive(Clone, Debug, PartialEq)]
pub struct PlayCall {
    pub token: PlaybackToken,
    pub handle: u32,
    pub when: f64,
    pub offset: f64,
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub now: f64,
    pub latency: Option<f64>,
    pub plays: Vec<PlayCall>,
    pub detached: Vec<PlaybackToken>,
    pub gain: Option<f32>,
    pub suspended: bool,
    pub suspends: usize,
    pub resumes: usize,
    pub closes: usize,
    pub reject_plays: bool,
}

/// Recording sink with a manually advanced clock.
#[derive(Clone, Debug, Default)]
pub struct FakeSink {
    pub log: Arc<Mutex<SinkLog>>,
}

impl FakeSink {
    pub fn new(now: f64, latency: Option<f64>) -> Self {
        let sink = Self::default();
        {
            let mut log = sink.log.lock().unwrap();
            log.now = now;
            log.latency = latency;
        }
        sink
    }

    pub fn advance(&self, secs: f64) {
        self.log.lock().unwrap().now += secs;
    }

    pub fn plays(&self) -> Vec<PlayCall> {
        self.log.lock().unwrap().plays.clone()
    }

    pub fn clear_plays(&self) {
        self.log.lock().unwrap().plays.clear();
    }
}

impl AudioSink for FakeSink {
    type Handle = u32;

    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().now
    }

    fn base_latency(&self) -> Option<f64> {
        self.log.lock().unwrap().latency
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn play(
        &mut self,
        token: PlaybackToken,
        handle: &u32,
        when: f64,
        offset: f64,
    ) -> Result<(), SchedulingRejected> {
        let mut log = self.log.lock().unwrap();
        if log.reject_plays {
            return Err(SchedulingRejected::NotReady);
        }
        log.plays.push(PlayCall {
            token,
            handle: *handle,
            when,
            offset,
        });
        Ok(())
    }

    fn detach(&mut self, token: PlaybackToken) {
        self.log.lock().unwrap().detached.push(token);
    }

    fn set_gain(&mut self, gain: f32) {
        self.log.lock().unwrap().gain = Some(gain);
    }

    fn suspend(&mut self) -> Result<(), SinkError> {
        let mut log = self.log.lock().unwrap();
        log.suspended = true;
        log.suspends += 1;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SinkError> {
        let mut log = self.log.lock().unwrap();
        log.suspended = false;
        log.resumes += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }
}

/// Minimal PCM16 WAV file with a ramp signal.
pub fn wav_bytes(rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let block_align = channels as u32 * 2;
    let data_len = frames as u32 * block_align;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * block_align).to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let v = ((i % 200) as i16 - 100) * 100;
        for _ in 0..channels {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}
