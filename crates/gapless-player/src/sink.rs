//! Output capability consumed by the scheduler.
//!
//! A sink owns the device, its running clock and one shared gain stage. The
//! scheduler only tells it *when* a decoded handle should start; mixing and
//! rendering are the sink's business.

use crate::error::{SchedulingRejected, SinkError};
use crate::segment::PlaybackToken;

/// Invoked by a sink, from any thread, once the request identified by the token has
/// played to completion.
pub type EndedCallback = Box<dyn Fn(PlaybackToken) + Send + 'static>;

/// Audio output with a monotonically increasing hardware clock.
pub trait AudioSink {
    /// Decoded audio the sink knows how to play.
    type Handle;

    /// Hardware clock in seconds. Stops advancing while suspended.
    fn current_time(&self) -> f64;

    /// Reported output latency in seconds, when the device exposes one.
    fn base_latency(&self) -> Option<f64>;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Create a one-shot node for `handle`, connect it to the gain stage, and start it
    /// at hardware time `when`, skipping the first `offset` seconds of the handle.
    ///
    /// The sink reports completion of this node with `token`.
    fn play(
        &mut self,
        token: PlaybackToken,
        handle: &Self::Handle,
        when: f64,
        offset: f64,
    ) -> Result<(), SchedulingRejected>;

    /// Disconnect the node started with `token`. It must not report completion afterwards.
    fn detach(&mut self, token: PlaybackToken);

    /// Set the effective gain applied to every node.
    fn set_gain(&mut self, gain: f32);

    /// Suspend the device; completes once the device has stopped.
    fn suspend(&mut self) -> Result<(), SinkError>;

    /// Resume the device; completes once the device is running again.
    fn resume(&mut self) -> Result<(), SinkError>;

    /// Release the device. Called exactly once.
    fn close(&mut self);
}
