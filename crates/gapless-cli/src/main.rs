//! gapless-play: stream audio files through the gapless scheduler.
//!
//! Each file is read in fixed-size byte chunks and handed to the player as if it were
//! arriving over a network. Playback stays blocked until `--start-delay-ms` has passed
//! (and at least one segment is decoded), then starts at `--seek-ms`.

mod cli;
mod config;

use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use gapless_player::decode::SymphoniaDecoder;
use gapless_player::events::DecodeEvent;
use gapless_player::playback::CpalSink;
use gapless_player::player::{DecodeCompletion, Player};
use gapless_player::segment::PcmBuffer;
use gapless_player::status::progress_line;
use gapless_player::{PlaybackState, device};
use tracing_subscriber::EnvFilter;

use config::PlayConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const PROGRESS_EVERY: Duration = Duration::from_secs(5);
/// Slack when deciding the timeline has played out.
const END_EPSILON_SECS: f64 = 0.05;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,gapless_play=info,gapless_player=info")
        }))
        .init();

    if args.list_devices {
        device::list_devices(&cpal::default_host())?;
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || stop_for_signal.store(true, Ordering::Relaxed)) {
        tracing::warn!("failed to install ctrl-c handler: {e}");
    }

    let cfg = PlayConfig::from_args(&args);
    let status = play(&cfg, &stop)?;

    if cfg.status_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("serialize status")?
        );
    }
    Ok(())
}

fn play(cfg: &PlayConfig, stop: &AtomicBool) -> Result<gapless_types::SchedulerStatus> {
    let output = cfg.output.clone();
    let extension = cfg.common_extension();
    let mut player: Player<Arc<PcmBuffer>> = Player::spawn(
        cfg.scheduler.clone(),
        move |on_ended| CpalSink::open(&output, on_ended),
        move |rate| {
            let decoder = SymphoniaDecoder::new(Some(rate));
            match extension {
                Some(ext) => decoder.with_extension(ext),
                None => decoder,
            }
        },
    )?;
    tracing::info!(rate_hz = player.sample_rate(), files = cfg.files.len(), "player ready");

    let events = player.subscribe();
    let started = Instant::now();
    let mut chunk = vec![0u8; cfg.chunk_bytes];

    'files: for path in &cfg.files {
        let mut file = File::open(path).with_context(|| format!("open {path:?}"))?;
        let mut last: Option<DecodeCompletion> = None;
        loop {
            if stop.load(Ordering::Relaxed) {
                break 'files;
            }
            let n = file
                .read(&mut chunk)
                .with_context(|| format!("read {path:?}"))?;
            if n == 0 {
                break;
            }
            last = Some(player.decode(chunk[..n].to_vec()));
            log_events(&events);
            maybe_unblock(&player, cfg, started, false);
        }

        match last.and_then(DecodeCompletion::wait) {
            Some(Ok(())) => tracing::info!(path = ?path, "file decoded"),
            Some(Err(e)) => {
                tracing::warn!(path = ?path, "file could not be decoded: {e}");
                break;
            }
            None => break,
        }
        log_events(&events);
        maybe_unblock(&player, cfg, started, false);
    }

    maybe_unblock(&player, cfg, started, true);
    wait_until_played(&player, stop);

    let status = player.status();
    player.destroy();
    Ok(status)
}

/// Leave the blocked state once the start delay has passed and there is audio,
/// or unconditionally when `force` is set.
fn maybe_unblock(player: &Player<Arc<PcmBuffer>>, cfg: &PlayConfig, started: Instant, force: bool) {
    let status = player.status();
    if status.state != PlaybackState::Blocked {
        return;
    }
    if !force && (started.elapsed() < cfg.start_delay || status.available_duration <= 0.0) {
        return;
    }
    if force {
        let remaining = cfg.start_delay.saturating_sub(started.elapsed());
        std::thread::sleep(remaining);
    }

    let offset_ms = cfg.seek_ms.unwrap_or(0) as f64;
    if cfg.seek_ms.is_some() {
        player.set_blocked_time(offset_ms);
    }
    player.unblock(offset_ms);
}

fn wait_until_played(player: &Player<Arc<PcmBuffer>>, stop: &AtomicBool) {
    let mut last_progress = Instant::now();
    loop {
        if stop.load(Ordering::Relaxed) {
            tracing::info!("interrupted");
            return;
        }
        let status = player.status();
        if status.state == PlaybackState::Destroyed {
            return;
        }
        let played_out = status.current_time + END_EPSILON_SECS >= status.available_duration;
        if status.queued_segments == 0 || played_out {
            tracing::info!("{}", progress_line(&status));
            return;
        }
        if last_progress.elapsed() >= PROGRESS_EVERY {
            tracing::info!("{}", progress_line(&status));
            last_progress = Instant::now();
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn log_events(events: &Receiver<DecodeEvent>) {
    for event in events.try_iter() {
        match event {
            DecodeEvent::Succeeded => tracing::debug!("segment decoded"),
            DecodeEvent::Failed { reason } => tracing::debug!("waiting for more bytes: {reason}"),
        }
    }
}
