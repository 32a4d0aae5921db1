use serde::{Deserialize, Serialize};

/// Lifecycle state of a gapless scheduler.
///
/// `Blocked` is the initial state; `Destroyed` is terminal.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Output not yet permitted; decoded segments are held, not scheduled.
    #[default]
    Blocked,
    /// Segments are scheduled against the hardware clock as they arrive.
    Running,
    /// Output device suspended; scheduled start times stay valid.
    Paused,
    /// Torn down. Every further call is a no-op.
    Destroyed,
}

impl PlaybackState {
    /// Whether decoded segments should be handed to the output right away.
    pub fn is_unblocked(self) -> bool {
        matches!(self, PlaybackState::Running | PlaybackState::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Blocked => "blocked",
            PlaybackState::Running => "running",
            PlaybackState::Paused => "paused",
            PlaybackState::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a decode notification, without the payload.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecodeEventKind {
    /// `decode:success`
    Success,
    /// `decode:error`
    Error,
}

/// Point-in-time view of a scheduler, suitable for logs and JSON output.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerStatus {
    /// Current lifecycle state.
    pub state: PlaybackState,
    /// Logical playback position in seconds.
    pub current_time: f64,
    /// Total decoded audio in seconds.
    pub available_duration: f64,
    /// Segments still owned by the queue (scheduled or held).
    pub queued_segments: usize,
    /// Bytes accumulated but not yet decoded.
    pub pending_bytes: usize,
    /// Volume level in `0.0..=1.0`.
    pub volume: f32,
    pub muted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_state_serializes_snake_case() {
        let json = serde_json::to_string(&PlaybackState::Destroyed).unwrap();
        assert_eq!(json, "\"destroyed\"");
        let back: PlaybackState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(back, PlaybackState::Paused);
    }

    #[test]
    fn default_state_is_blocked() {
        assert_eq!(PlaybackState::default(), PlaybackState::Blocked);
        assert!(!PlaybackState::Blocked.is_unblocked());
        assert!(PlaybackState::Paused.is_unblocked());
        assert!(!PlaybackState::Destroyed.is_unblocked());
    }

    #[test]
    fn status_roundtrips_through_json() {
        let status = SchedulerStatus {
            state: PlaybackState::Running,
            current_time: 1.5,
            available_duration: 6.0,
            queued_segments: 3,
            pending_bytes: 12,
            volume: 0.5,
            muted: true,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"state\":\"running\""));
        let back: SchedulerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
