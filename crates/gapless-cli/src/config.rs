use std::path::PathBuf;
use std::time::Duration;

use gapless_player::config::{OutputConfig, SchedulerConfig};

use crate::cli::Args;

/// Everything `gapless-play` needs once arguments are parsed.
#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub files: Vec<PathBuf>,
    pub chunk_bytes: usize,
    pub seek_ms: Option<u64>,
    pub start_delay: Duration,
    pub status_json: bool,
    pub scheduler: SchedulerConfig,
    pub output: OutputConfig,
}

impl PlayConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            files: args.files.clone(),
            chunk_bytes: usize::try_from(args.chunk_bytes).unwrap_or(usize::MAX),
            seek_ms: args.seek_ms,
            start_delay: Duration::from_millis(args.start_delay_ms),
            status_json: args.status_json,
            scheduler: SchedulerConfig {
                volume: args.volume,
                muted: args.muted,
                fallback_latency_frames: args.fallback_latency_frames,
            },
            output: OutputConfig {
                device: args.device.clone(),
                target_rate: args.rate,
                fixed_buffer: args.fixed_buffer,
            },
        }
    }

    /// Container hint shared by every input file, if they agree on one.
    pub fn common_extension(&self) -> Option<String> {
        let mut exts = self.files.iter().map(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        });
        let first = exts.next()??;
        exts.all(|e| e.as_deref() == Some(first.as_str()))
            .then_some(first)
    }
}
