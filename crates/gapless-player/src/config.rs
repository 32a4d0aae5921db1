/// Construction parameters for a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Initial volume level in `0.0..=1.0`.
    pub volume: f32,
    /// Initial mute flag.
    pub muted: bool,
    /// Output latency estimate in frames, used when the sink reports no base latency.
    pub fallback_latency_frames: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            fallback_latency_frames: 128,
        }
    }
}

/// Output device selection for the CPAL sink.
#[derive(Clone, Debug, Default)]
pub struct OutputConfig {
    /// Case-insensitive substring of the device name; `None` picks the host default.
    pub device: Option<String>,
    /// Preferred output sample rate; `None` picks the highest supported rate.
    pub target_rate: Option<u32>,
    /// Request a fixed callback buffer size when the device advertises a range.
    ///
    /// A fixed size also gives the sink a known base latency.
    pub fixed_buffer: bool,
}
