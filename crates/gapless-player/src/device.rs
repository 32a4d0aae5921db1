//! Output device discovery and stream-config selection.
//!
//! Picks the CPAL device and stream config an [`OutputConfig`] describes:
//! - device by case-insensitive substring match, else the host default
//! - sample rate as close to the requested one as the device allows
//! - sample format ranked by precision (`f32` first)

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::OutputConfig;

/// Largest fixed callback buffer requested from the device.
const MAX_BUFFER_FRAMES: u32 = 16_384;

/// Device plus the stream config chosen for it.
pub struct OutputSelection {
    pub device: cpal::Device,
    pub name: String,
    pub stream_config: cpal::StreamConfig,
    pub sample_format: cpal::SampleFormat,
}

impl OutputSelection {
    /// Callback buffer size in frames, when fixed.
    pub fn buffer_frames(&self) -> Option<u32> {
        match self.stream_config.buffer_size {
            cpal::BufferSize::Fixed(frames) => Some(frames),
            cpal::BufferSize::Default => None,
        }
    }
}

/// Resolve `config` against the host's output devices.
pub fn select_output(host: &cpal::Host, config: &OutputConfig) -> Result<OutputSelection> {
    let device = pick_device(host, config.device.as_deref())?;
    let name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let supported = pick_output_config(&device, config.target_rate)
        .with_context(|| format!("pick output config for {name}"))?;
    let sample_format = supported.sample_format();
    let mut stream_config: cpal::StreamConfig = supported.config();
    if config.fixed_buffer {
        if let Some(buf) = pick_buffer_size(&supported) {
            stream_config.buffer_size = buf;
        }
    }

    Ok(OutputSelection {
        device,
        name,
        stream_config,
        sample_format,
    })
}

/// First output device whose name contains `needle` (case-insensitive), or the default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .ok()
                .is_some_and(|n| matches_device_name(&n.name(), needle))
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Best supported output config for `target_rate`.
///
/// Prefers the highest rate not above the target (the highest overall when unset),
/// then the most precise sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below: target_rate.is_none_or(|t| rate <= t),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.beats(b)) {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Fixed callback buffer size, capped at [`MAX_BUFFER_FRAMES`].
///
/// Returns `None` when the device does not report a range, leaving CPAL's default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.below != other.below {
            self.below
        } else if self.rate != other.rate {
            self.rate > other.rate
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn clamp_buffer_frames(min: u32, max: u32) -> u32 {
    if max <= MAX_BUFFER_FRAMES {
        max
    } else {
        min.max(MAX_BUFFER_FRAMES)
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
