//! Gapless playback of incrementally decoded audio.
//!
//! Encoded bytes arrive in arbitrary chunks, are decoded into independent segments,
//! and each segment is scheduled on the output device's clock so that consecutive
//! segments play back-to-back with no gap or overlap.
//!
//! - [`scheduler::Scheduler`]: the single-threaded engine.
//! - [`player::Player`]: the engine on its own worker thread.
//! - [`playback::CpalSink`] and [`decode::SymphoniaDecoder`]: stock output and decoder.

pub mod anchor;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod events;
pub mod playback;
pub mod player;
pub mod queue;
pub mod resample;
pub mod scheduler;
pub mod segment;
pub mod sink;
pub mod status;

#[cfg(test)]
mod test_support;

pub use gapless_types::{DecodeEventKind, PlaybackState, SchedulerStatus};
