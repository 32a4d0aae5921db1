//! Threaded player.
//!
//! A worker thread owns the [`Scheduler`] and its sink; every public call, decoder
//! completion and playback-ended notification is a [`Command`] on one channel, so the
//! engine only ever runs on that thread. The sink is opened on the worker because
//! output streams are not `Send`.
//!
//! Decoder attempts run on a second thread and post their results back as commands.

use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use gapless_types::{PlaybackState, SchedulerStatus};

use crate::config::SchedulerConfig;
use crate::decode::{DecodeAttempt, Decoded, Decoder};
use crate::error::{DecodeError, SinkError};
use crate::events::DecodeEvent;
use crate::scheduler::Scheduler;
use crate::segment::PlaybackToken;
use crate::sink::{AudioSink, EndedCallback};

type DecodeReply = Sender<Result<(), DecodeError>>;

/// Messages handled by the worker thread.
enum Command<H> {
    Decode {
        bytes: Vec<u8>,
        reply: DecodeReply,
    },
    DecodeFinished {
        attempt: u64,
        result: Result<Decoded<H>, DecodeError>,
    },
    SegmentEnded(PlaybackToken),
    Unblock(f64),
    SetBlockedTime(f64),
    SetVolume(f32),
    SetMuted(bool),
    Pause(Sender<Result<(), SinkError>>),
    Resume(Sender<Result<(), SinkError>>),
    Subscribe(Sender<DecodeEvent>),
    Status(Sender<SchedulerStatus>),
    Destroy(Sender<()>),
}

/// Resolves once the decoder attempt covering the bytes of one
/// [`Player::decode`] call has finished.
#[derive(Debug)]
pub struct DecodeCompletion {
    rx: Receiver<Result<(), DecodeError>>,
}

impl DecodeCompletion {
    /// Block until the attempt finishes. `None` when the player was destroyed first.
    pub fn wait(self) -> Option<Result<(), DecodeError>> {
        self.rx.recv().ok()
    }

    /// Non-blocking check.
    pub fn try_wait(&self) -> Option<Result<(), DecodeError>> {
        self.rx.try_recv().ok()
    }
}

/// Handle to a scheduler running on its own thread.
pub struct Player<H> {
    cmd_tx: Sender<Command<H>>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl<H: Send + 'static> Player<H> {
    /// Start the worker thread.
    ///
    /// `open_sink` runs on the worker and receives the callback the sink must invoke
    /// when a play request finishes. `make_decoder` receives the sink's sample rate.
    pub fn spawn<S, D, F, M>(config: SchedulerConfig, open_sink: F, make_decoder: M) -> Result<Self>
    where
        S: AudioSink<Handle = H> + 'static,
        D: Decoder<Handle = H>,
        F: FnOnce(EndedCallback) -> Result<S> + Send + 'static,
        M: FnOnce(u32) -> D + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<Command<H>>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        let worker_tx = cmd_tx.clone();
        let worker = std::thread::Builder::new()
            .name("gapless-scheduler".into())
            .spawn(move || {
                let ended_tx = worker_tx.clone();
                let on_ended: EndedCallback = Box::new(move |token| {
                    let _ = ended_tx.send(Command::SegmentEnded(token));
                });
                let sink = match open_sink(on_ended) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let sample_rate = sink.sample_rate();
                let decoder = make_decoder(sample_rate);
                let (attempt_tx, decoder_thread) = match spawn_decoder(decoder, worker_tx) {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));
                drop(ready_tx);

                let scheduler = Scheduler::new(config, sink);
                run_worker(scheduler, cmd_rx, attempt_tx);

                if decoder_thread.join().is_err() {
                    tracing::warn!("decoder thread panicked");
                }
            })
            .context("spawn scheduler thread")?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e.context("open audio sink"));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(anyhow!("scheduler thread exited during startup"));
            }
        };

        Ok(Self {
            cmd_tx,
            worker: Some(worker),
            sample_rate,
        })
    }

    /// Output sample rate reported by the sink at startup.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Feed encoded bytes.
    pub fn decode(&self, bytes: impl Into<Vec<u8>>) -> DecodeCompletion {
        let (reply, rx) = crossbeam_channel::bounded(1);
        let _ = self.cmd_tx.send(Command::Decode {
            bytes: bytes.into(),
            reply,
        });
        DecodeCompletion { rx }
    }

    pub fn unblock(&self, offset_ms: f64) {
        let _ = self.cmd_tx.send(Command::Unblock(offset_ms));
    }

    pub fn set_blocked_time(&self, target_ms: f64) {
        let _ = self.cmd_tx.send(Command::SetBlockedTime(target_ms));
    }

    pub fn set_volume(&self, volume: f32) {
        let _ = self.cmd_tx.send(Command::SetVolume(volume));
    }

    pub fn set_muted(&self, muted: bool) {
        let _ = self.cmd_tx.send(Command::SetMuted(muted));
    }

    pub fn pause(&self) -> Result<(), SinkError> {
        self.request(Command::Pause).unwrap_or(Ok(()))
    }

    pub fn resume(&self) -> Result<(), SinkError> {
        self.request(Command::Resume).unwrap_or(Ok(()))
    }

    /// Receive every later decode notification on the returned channel.
    pub fn subscribe(&self) -> Receiver<DecodeEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _ = self.cmd_tx.send(Command::Subscribe(tx));
        rx
    }

    /// Snapshot of the scheduler; reports `Destroyed` once the worker is gone.
    pub fn status(&self) -> SchedulerStatus {
        self.request(Command::Status).unwrap_or_else(|| SchedulerStatus {
            state: PlaybackState::Destroyed,
            ..SchedulerStatus::default()
        })
    }

    pub fn current_time(&self) -> f64 {
        self.status().current_time
    }

    pub fn available_duration(&self) -> f64 {
        self.status().available_duration
    }

    pub fn state(&self) -> PlaybackState {
        self.status().state
    }

    pub fn volume(&self) -> f32 {
        self.status().volume
    }

    pub fn muted(&self) -> bool {
        self.status().muted
    }

    /// Tear down the scheduler and stop the worker. Later calls are no-ops.
    pub fn destroy(&mut self) {
        let _ = self.request(Command::Destroy);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("scheduler thread panicked");
            }
        }
    }

    /// Send a command carrying a reply channel and wait for the answer.
    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command<H>) -> Option<T> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.cmd_tx.send(make(tx)).ok()?;
        rx.recv().ok()
    }
}

impl<H> Drop for Player<H> {
    fn drop(&mut self) {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let _ = self.cmd_tx.send(Command::Destroy(tx));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn spawn_decoder<D: Decoder>(
    mut decoder: D,
    results: Sender<Command<D::Handle>>,
) -> Result<(Sender<DecodeAttempt>, JoinHandle<()>)>
where
    D::Handle: Send + 'static,
{
    let (attempt_tx, attempt_rx) = crossbeam_channel::unbounded::<DecodeAttempt>();
    let join = std::thread::Builder::new()
        .name("gapless-decoder".into())
        .spawn(move || {
            while let Ok(attempt) = attempt_rx.recv() {
                let result = decoder.decode(&attempt.bytes);
                let finished = Command::DecodeFinished {
                    attempt: attempt.id,
                    result,
                };
                if results.send(finished).is_err() {
                    break;
                }
            }
        })
        .context("spawn decoder thread")?;
    Ok((attempt_tx, join))
}

/// Callers waiting on decode completions, split by whether the in-flight attempt
/// covers their bytes.
struct DecodeWaiters {
    queued: Vec<DecodeReply>,
    in_flight: Vec<DecodeReply>,
}

impl DecodeWaiters {
    fn start_attempt(&mut self) {
        self.in_flight.append(&mut self.queued);
    }

    fn resolve(&mut self, result: &Result<(), DecodeError>) {
        for reply in self.in_flight.drain(..) {
            let _ = reply.send(result.clone());
        }
    }
}

fn run_worker<S: AudioSink>(
    mut scheduler: Scheduler<S>,
    cmd_rx: Receiver<Command<S::Handle>>,
    attempt_tx: Sender<DecodeAttempt>,
) {
    let mut waiters = DecodeWaiters {
        queued: Vec::new(),
        in_flight: Vec::new(),
    };
    let dispatch = |attempt: Option<DecodeAttempt>, waiters: &mut DecodeWaiters| {
        if let Some(attempt) = attempt {
            waiters.start_attempt();
            tracing::trace!(attempt = attempt.id, bytes = attempt.bytes.len(), "decode attempt");
            if attempt_tx.send(attempt).is_err() {
                tracing::warn!("decoder thread is gone");
            }
        }
    };

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            Command::Decode { bytes, reply } => {
                waiters.queued.push(reply);
                let attempt = scheduler.decode(&bytes);
                dispatch(attempt, &mut waiters);
            }
            Command::DecodeFinished { attempt, result } => {
                let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
                let next = scheduler.finish_decode(attempt, result);
                waiters.resolve(&outcome);
                if next.is_none() && !scheduler.decode_in_flight() {
                    // Chunks queued behind this attempt added no bytes still to decode.
                    waiters.start_attempt();
                    waiters.resolve(&outcome);
                }
                dispatch(next, &mut waiters);
            }
            Command::SegmentEnded(token) => scheduler.segment_ended(token),
            Command::Unblock(offset_ms) => scheduler.unblock(offset_ms),
            Command::SetBlockedTime(ms) => scheduler.set_blocked_time(ms),
            Command::SetVolume(v) => scheduler.set_volume(v),
            Command::SetMuted(m) => scheduler.set_muted(m),
            Command::Pause(reply) => {
                let _ = reply.send(scheduler.pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(scheduler.resume());
            }
            Command::Subscribe(tx) => {
                scheduler.subscribe(Box::new(move |event: &DecodeEvent| {
                    let _ = tx.send(event.clone());
                }));
            }
            Command::Status(reply) => {
                let _ = reply.send(scheduler.status());
            }
            Command::Destroy(reply) => {
                scheduler.destroy();
                let _ = reply.send(());
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSink;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Succeeds once at least 4 bytes are buffered; each byte is 0.5 s of audio.
    struct ByteDecoder;

    impl Decoder for ByteDecoder {
        type Handle = u32;

        fn decode(&mut self, bytes: &[u8]) -> Result<Decoded<u32>, DecodeError> {
            if bytes.len() < 4 {
                return Err(DecodeError::Incomplete {
                    decoded: bytes.len() as u64,
                    expected: 4,
                });
            }
            Ok(Decoded {
                handle: bytes[0] as u32,
                duration: bytes.len() as f64 * 0.5,
            })
        }
    }

    type EndedSlot = Arc<Mutex<Option<EndedCallback>>>;

    fn spawn_player() -> (Player<u32>, FakeSink, EndedSlot) {
        let sink = FakeSink::new(1.0, Some(0.25));
        let probe = sink.clone();
        let slot: EndedSlot = Arc::new(Mutex::new(None));
        let slot_in = slot.clone();
        let player = Player::spawn(
            SchedulerConfig::default(),
            move |on_ended| {
                *slot_in.lock().unwrap() = Some(on_ended);
                Ok(sink)
            },
            |_rate| ByteDecoder,
        )
        .unwrap();
        (player, probe, slot)
    }

    #[test]
    fn spawn_reports_sink_rate() {
        let (player, _sink, _slot) = spawn_player();
        assert_eq!(player.sample_rate(), 48_000);
        assert_eq!(player.state(), PlaybackState::Blocked);
    }

    #[test]
    fn spawn_fails_when_sink_cannot_open() {
        let result = Player::<u32>::spawn(
            SchedulerConfig::default(),
            |_on_ended| -> Result<FakeSink> { Err(anyhow!("no device")) },
            |_rate| ByteDecoder,
        );
        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("no device"));
    }

    #[test]
    fn decode_completion_reports_outcome() {
        let (player, _sink, _slot) = spawn_player();

        let short = player.decode(vec![1u8, 2]).wait().unwrap();
        assert!(matches!(short, Err(DecodeError::Incomplete { .. })));

        let full = player.decode(vec![3u8, 4]).wait().unwrap();
        assert_eq!(full, Ok(()));

        let status = player.status();
        assert_eq!(status.available_duration, 2.0);
        assert_eq!(status.queued_segments, 1);
        assert_eq!(status.pending_bytes, 0);
    }

    #[test]
    fn unblock_schedules_through_the_sink() {
        let (player, sink, _slot) = spawn_player();
        player.decode(vec![9u8; 4]).wait().unwrap().unwrap();
        player.unblock(0.0);

        assert_eq!(player.state(), PlaybackState::Running);
        let plays = sink.plays();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].handle, 9);
        assert_eq!(plays[0].when, 1.0 + 2.0 + 0.25);
    }

    #[test]
    fn ended_callback_pops_segment() {
        let (player, sink, slot) = spawn_player();
        player.decode(vec![1u8; 4]).wait().unwrap().unwrap();
        player.unblock(0.0);
        assert_eq!(player.status().queued_segments, 1);

        let token = sink.plays()[0].token;
        if let Some(cb) = slot.lock().unwrap().as_ref() {
            cb(token);
        }
        assert_eq!(player.status().queued_segments, 0);
    }

    #[test]
    fn subscribers_receive_decode_events() {
        let (player, _sink, _slot) = spawn_player();
        let events = player.subscribe();

        player.decode(vec![1u8]).wait();
        player.decode(vec![1u8; 3]).wait();

        let first = events.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(first, DecodeEvent::Failed { .. }));
        assert_eq!(second, DecodeEvent::Succeeded);
    }

    /// Holds each decode until the test releases it.
    struct GatedDecoder {
        gate: Receiver<()>,
    }

    impl Decoder for GatedDecoder {
        type Handle = u32;

        fn decode(&mut self, bytes: &[u8]) -> Result<Decoded<u32>, DecodeError> {
            let _ = self.gate.recv();
            ByteDecoder.decode(bytes)
        }
    }

    #[test]
    fn empty_chunk_behind_in_flight_attempt_completes() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let player = Player::spawn(
            SchedulerConfig::default(),
            |_on_ended| Ok(FakeSink::new(1.0, Some(0.25))),
            move |_rate| GatedDecoder { gate: gate_rx },
        )
        .unwrap();

        let first = player.decode(vec![5u8; 4]);
        let empty = player.decode(Vec::new());
        // Both requests are queued on the worker before the decoder is released.
        assert_eq!(player.status().pending_bytes, 4);
        gate_tx.send(()).unwrap();

        assert_eq!(first.wait(), Some(Ok(())));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let outcome = loop {
            if let Some(outcome) = empty.try_wait() {
                break outcome;
            }
            assert!(std::time::Instant::now() < deadline, "empty chunk never completed");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(outcome, Ok(()));
        assert_eq!(player.status().queued_segments, 1);
    }

    #[test]
    fn volume_and_mute_reach_the_sink() {
        let (player, sink, _slot) = spawn_player();
        player.set_volume(0.4);
        player.set_muted(true);
        assert!(player.muted());
        assert_eq!(player.volume(), 0.4);
        assert_eq!(sink.log.lock().unwrap().gain, Some(0.0));
        player.set_muted(false);
        assert!(!player.muted());
        assert_eq!(sink.log.lock().unwrap().gain, Some(0.4));
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let (player, sink, _slot) = spawn_player();
        player.unblock(0.0);
        assert_eq!(player.pause(), Ok(()));
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.resume(), Ok(()));
        assert_eq!(player.state(), PlaybackState::Running);
        assert_eq!(sink.log.lock().unwrap().suspends, 1);
    }

    #[test]
    fn calls_after_destroy_are_no_ops() {
        let (mut player, sink, _slot) = spawn_player();
        player.decode(vec![1u8; 4]).wait();
        player.destroy();
        player.destroy();

        assert_eq!(sink.log.lock().unwrap().closes, 1);
        assert_eq!(player.state(), PlaybackState::Destroyed);
        assert!(player.decode(vec![1u8; 4]).wait().is_none());
        player.unblock(0.0);
        assert_eq!(player.pause(), Ok(()));
        assert!(sink.plays().is_empty());
    }
}
