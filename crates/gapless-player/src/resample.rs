//! One-shot resampling of a decoded segment to the output rate.
//!
//! Uses Rubato's sinc resampler over the whole segment, feeding fixed input
//! chunks and flushing with silence until the filter delay has been emitted.
//! The result has `ceil(frames * dst_rate / src_rate)` frames, aligned so that the
//! first output frame corresponds to the first input frame.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Resampler input chunk size in frames.
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

/// Convert interleaved `f32` samples from `src_rate` to `dst_rate`.
///
/// Returns the input unchanged when the rates match or there is nothing to convert.
pub fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<Vec<f32>> {
    if channels == 0 {
        return Err(anyhow!("cannot resample zero channels"));
    }
    if src_rate == 0 || dst_rate == 0 {
        return Err(anyhow!("invalid sample rate {src_rate} -> {dst_rate}"));
    }
    let in_frames = samples.len() / channels;
    if src_rate == dst_rate || in_frames == 0 {
        return Ok(samples[..in_frames * channels].to_vec());
    }

    let f_ratio = dst_rate as f64 / src_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let chunk_in_frames = chunk_frames.max(1);
    let mut resampler: Box<dyn Resampler<f32>> = Box::new(
        Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_in_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?,
    );

    let delay = resampler.output_delay();
    let expected = (in_frames as f64 * f_ratio).ceil() as usize;
    let wanted = delay + expected;

    let mut out = Vec::with_capacity(wanted * channels);
    let mut out_interleaved = vec![0.0f32; resampler.output_frames_max() * channels];
    let mut chunk = vec![0.0f32; chunk_in_frames * channels];

    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let mut consumed = 0usize;
    // Input chunks, then silent flush chunks until the delayed tail is out.
    let per_round = ((chunk_in_frames as f64 * f_ratio).floor() as usize).max(1);
    let max_rounds = in_frames / chunk_in_frames + wanted / per_round + 8;
    for _ in 0..max_rounds {
        if consumed >= in_frames && out.len() / channels >= wanted {
            break;
        }

        let take = (in_frames - consumed).min(chunk_in_frames);
        chunk.fill(0.0);
        if take > 0 {
            let from = consumed * channels;
            chunk[..take * channels].copy_from_slice(&samples[from..from + take * channels]);
        }
        consumed += take;

        let input_adapter = InterleavedSlice::new(&chunk, channels, chunk_in_frames)
            .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
        let out_capacity_frames = out_interleaved.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut out_interleaved, channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

        indexing.input_offset = 0;
        indexing.output_offset = 0;
        indexing.partial_len = if take == chunk_in_frames { None } else { Some(take) };

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process error: {e}"))?;

        out.extend_from_slice(&out_interleaved[..nbr_out * channels]);
    }

    let start = (delay * channels).min(out.len());
    let end = (wanted * channels).min(out.len());
    let mut aligned = out[start..end].to_vec();
    aligned.resize(expected * channels, 0.0);
    Ok(aligned)
}
