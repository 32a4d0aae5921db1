use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gapless-play", version)]
/// Stream audio files through the gapless scheduler in byte chunks.
pub struct Args {
    /// Audio files, played back-to-back
    #[arg(required_unless_present = "list_devices")]
    pub files: Vec<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Preferred output sample rate in Hz (defaults to the highest the device supports)
    #[arg(long)]
    pub rate: Option<u32>,

    /// Request a fixed device buffer size (gives a known output latency)
    #[arg(long)]
    pub fixed_buffer: bool,

    /// Bytes handed to the decoder per call
    #[arg(long, default_value_t = 65_536, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_bytes: u64,

    /// Volume level between 0.0 and 1.0
    #[arg(long, default_value_t = 1.0, value_parser = parse_volume)]
    pub volume: f32,

    /// Start muted
    #[arg(long)]
    pub muted: bool,

    /// Start playback this many milliseconds into the stream
    #[arg(long)]
    pub seek_ms: Option<u64>,

    /// Stay blocked for this long before starting playback
    #[arg(long, default_value_t = 0)]
    pub start_delay_ms: u64,

    /// Output latency estimate (frames) used when the device reports none
    #[arg(long, default_value_t = 128)]
    pub fallback_latency_frames: u32,

    /// Print the final status snapshot as JSON
    #[arg(long)]
    pub status_json: bool,
}

fn parse_volume(s: &str) -> Result<f32, String> {
    let v: f32 = s.parse().map_err(|e| format!("invalid volume {s:?}: {e}"))?;
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("volume must be between 0.0 and 1.0, got {v}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let args = Args::try_parse_from(["gapless-play", "a.flac", "b.flac"]).unwrap();
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.chunk_bytes, 65_536);
        assert_eq!(args.volume, 1.0);
        assert_eq!(args.fallback_latency_frames, 128);
        assert!(args.seek_ms.is_none());
        assert!(!args.status_json);
    }

    #[test]
    fn list_devices_needs_no_files() {
        let args = Args::try_parse_from(["gapless-play", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(Args::try_parse_from(["gapless-play"]).is_err());
    }

    #[test]
    fn volume_must_be_in_range() {
        assert!(Args::try_parse_from(["gapless-play", "--volume", "1.5", "a.wav"]).is_err());
        let args = Args::try_parse_from(["gapless-play", "--volume", "0.25", "a.wav"]).unwrap();
        assert_eq!(args.volume, 0.25);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(Args::try_parse_from(["gapless-play", "--chunk-bytes", "0", "a.wav"]).is_err());
    }
}
