//! Error types for the gapless player.
//!
//! None of these are fatal to a scheduler: decode failures become notifications,
//! rejected play requests are ignored, and sink errors are reported to the caller of
//! `pause` / `resume` only.

use thiserror::Error;

/// Failure to interpret the accumulated bytes as one audio unit.
///
/// The bytes stay pending and are retried with the next arrival.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("no bytes to decode")]
    Empty,

    #[error("unrecognized audio data: {0}")]
    Unsupported(String),

    #[error("no decodable audio track")]
    NoTrack,

    /// The container declares more frames than the bytes hold (a truncated tail).
    #[error("incomplete audio data: decoded {decoded} of {expected} frames")]
    Incomplete { decoded: u64, expected: u64 },

    #[error("malformed audio data: {0}")]
    Malformed(String),

    #[error("resample failed: {0}")]
    Resample(String),
}

/// The sink refused a play request. The segment simply does not sound.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchedulingRejected {
    #[error("output is closed")]
    Closed,

    #[error("output device is not ready")]
    NotReady,

    #[error("buffer rate {buffer_hz} Hz does not match output rate {output_hz} Hz")]
    RateMismatch { buffer_hz: u32, output_hz: u32 },
}

/// Output device failure on suspend/resume.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("output is closed")]
    Closed,

    #[error("audio output error: {0}")]
    Device(String),
}
