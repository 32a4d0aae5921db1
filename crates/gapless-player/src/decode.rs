//! Decode pipeline.
//!
//! Raw bytes accumulate in [`PendingBytes`]. Every arrival asks the decoder to
//! interpret the *whole* accumulated tail as one audio unit, which tolerates encoders
//! that emit variable-sized, self-describing frames split across calls. At most one
//! attempt is in flight; bytes arriving meanwhile trigger a single follow-up attempt.
//!
//! [`SymphoniaDecoder`] is the stock decoder: it probes the bytes as one container,
//! decodes every packet to interleaved `f32`, and resamples to the output rate.

use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeError;
use crate::resample;
use crate::segment::PcmBuffer;

/// Decoded audio handed back by a [`Decoder`].
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded<H> {
    pub handle: H,
    /// Length in seconds.
    pub duration: f64,
}

/// External decoder capability: bytes in, one playable handle out.
///
/// Runs off the scheduler's execution context; results are posted back as completions.
pub trait Decoder: Send + 'static {
    type Handle;

    fn decode(&mut self, bytes: &[u8]) -> Result<Decoded<Self::Handle>, DecodeError>;
}

/// Growable buffer of not-yet-decoded input.
#[derive(Clone, Debug, Default)]
pub struct PendingBytes {
    data: Vec<u8>,
}

impl PendingBytes {
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Remove the first `len` bytes (everything, if shorter).
    pub fn consume(&mut self, len: usize) {
        let len = len.min(self.data.len());
        self.data.drain(..len);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One request to run the decoder over a snapshot of the pending bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeAttempt {
    pub id: u64,
    pub bytes: Vec<u8>,
}

/// Bookkeeping for pending bytes and the (single) in-flight attempt.
#[derive(Debug, Default)]
pub struct DecodePipeline {
    pending: PendingBytes,
    /// Attempt id and the number of pending bytes its snapshot covers.
    inflight: Option<(u64, usize)>,
    /// Bytes arrived while an attempt was in flight.
    retry: bool,
    next_id: u64,
}

impl DecodePipeline {
    pub fn pending(&self) -> &PendingBytes {
        &self.pending
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.inflight.map(|(id, _)| id)
    }

    /// Append `bytes`; returns an attempt to run unless one is already in flight.
    pub fn push(&mut self, bytes: &[u8]) -> Option<DecodeAttempt> {
        self.pending.append(bytes);
        if self.inflight.is_some() {
            self.retry = true;
            return None;
        }
        self.start()
    }

    /// Record the outcome of attempt `id`.
    ///
    /// On success the bytes that attempt covered are consumed; on failure they stay
    /// pending. Returns `false` for an attempt that is not the one in flight.
    pub fn complete(&mut self, id: u64, succeeded: bool) -> bool {
        match self.inflight {
            Some((current, covered)) if current == id => {
                self.inflight = None;
                if succeeded {
                    self.pending.consume(covered);
                }
                true
            }
            _ => false,
        }
    }

    /// Follow-up attempt for bytes that arrived while the last one was in flight.
    pub fn next_attempt(&mut self) -> Option<DecodeAttempt> {
        if self.inflight.is_some() || !self.retry {
            return None;
        }
        self.retry = false;
        if self.pending.is_empty() {
            return None;
        }
        self.start()
    }

    /// Forget everything, including the in-flight attempt.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.inflight = None;
        self.retry = false;
    }

    fn start(&mut self) -> Option<DecodeAttempt> {
        let id = self.next_id;
        self.next_id += 1;
        self.inflight = Some((id, self.pending.len()));
        Some(DecodeAttempt {
            id,
            bytes: self.pending.as_slice().to_vec(),
        })
    }
}

/// Symphonia-backed decoder producing [`PcmBuffer`]s at the output rate.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaDecoder {
    /// Resample decoded audio to this rate; `None` keeps the source rate.
    pub output_rate: Option<u32>,
    /// Container extension hint (for example `mp3`), when known.
    pub extension: Option<String>,
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
}

impl SymphoniaDecoder {
    pub fn new(output_rate: Option<u32>) -> Self {
        Self {
            output_rate,
            extension: None,
            chunk_frames: resample::DEFAULT_CHUNK_FRAMES,
        }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into());
        self
    }
}

impl Decoder for SymphoniaDecoder {
    type Handle = Arc<PcmBuffer>;

    fn decode(&mut self, bytes: &[u8]) -> Result<Decoded<Self::Handle>, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let (spec, samples, codec) = decode_all(bytes, self.extension.as_deref())?;
        let channels = spec.channels.count();

        let (rate, samples) = match self.output_rate {
            Some(dst) if dst != spec.rate => {
                let out = resample::resample_interleaved(
                    &samples,
                    channels,
                    spec.rate,
                    dst,
                    self.chunk_frames,
                )
                .map_err(|e| DecodeError::Resample(format!("{e:#}")))?;
                (dst, out)
            }
            _ => (spec.rate, samples),
        };

        let pcm = PcmBuffer::new(rate, channels, samples);
        let duration = pcm.duration();
        tracing::debug!(
            codec = codec.as_deref().unwrap_or("unknown"),
            source_rate_hz = spec.rate,
            rate_hz = rate,
            channels,
            duration,
            "segment decoded"
        );
        Ok(Decoded {
            handle: Arc::new(pcm),
            duration,
        })
    }
}

/// Probe `bytes` as one container and decode every packet of its default track.
fn decode_all(
    bytes: &[u8],
    extension: Option<&str>,
) -> Result<(SignalSpec, Vec<f32>, Option<String>), DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
    let mut format = probed.format;

    let track = format.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let codec_params: CodecParameters = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let mut spec: Option<SignalSpec> = None;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::trace!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        };

        let frame_spec = *decoded.spec();
        if spec.is_some_and(|s| s != frame_spec) {
            return Err(DecodeError::Malformed("signal spec changed mid-stream".into()));
        }
        spec = Some(frame_spec);

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, frame_spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    let Some(spec) = spec else {
        return Err(match codec_params.n_frames {
            Some(expected) if expected > 0 => DecodeError::Incomplete {
                decoded: 0,
                expected,
            },
            _ => DecodeError::Malformed("no audio frames decoded".into()),
        });
    };

    let decoded_frames = (samples.len() / spec.channels.count().max(1)) as u64;
    if let Some(expected) = codec_params.n_frames {
        let slack = codec_params.max_frames_per_packet.unwrap_or(0);
        if decoded_frames + slack < expected {
            return Err(DecodeError::Incomplete {
                decoded: decoded_frames,
                expected,
            });
        }
    }

    Ok((spec, samples, codec_name_from_params(&codec_params)))
}

/// Best-effort codec label used in logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wav_bytes;

    #[test]
    fn push_starts_attempt_over_full_tail() {
        let mut p = DecodePipeline::default();
        let a = p.push(b"abc").unwrap();
        assert_eq!(a.bytes, b"abc");
        assert_eq!(p.in_flight(), Some(a.id));
    }

    #[test]
    fn push_while_in_flight_coalesces_into_one_retry() {
        let mut p = DecodePipeline::default();
        let a = p.push(b"ab").unwrap();
        assert!(p.push(b"cd").is_none());
        assert!(p.push(b"ef").is_none());

        assert!(p.complete(a.id, false));
        let b = p.next_attempt().unwrap();
        assert_eq!(b.bytes, b"abcdef");
        assert!(p.next_attempt().is_none());
    }

    #[test]
    fn success_consumes_only_covered_bytes() {
        let mut p = DecodePipeline::default();
        let a = p.push(b"frame1").unwrap();
        assert!(p.push(b"fr").is_none());

        assert!(p.complete(a.id, true));
        assert_eq!(p.pending().as_slice(), b"fr");
        let b = p.next_attempt().unwrap();
        assert_eq!(b.bytes, b"fr");
    }

    #[test]
    fn failure_without_new_bytes_waits_for_more() {
        let mut p = DecodePipeline::default();
        let a = p.push(b"half").unwrap();
        assert!(p.complete(a.id, false));
        assert!(p.next_attempt().is_none());
        assert_eq!(p.pending().len(), 4);

        let b = p.push(b"+rest").unwrap();
        assert_eq!(b.bytes, b"half+rest");
    }

    #[test]
    fn stale_completion_is_rejected() {
        let mut p = DecodePipeline::default();
        let a = p.push(b"x").unwrap();
        assert!(!p.complete(a.id + 1, true));
        p.reset();
        assert!(!p.complete(a.id, true));
        assert!(p.pending().is_empty());
    }

    #[test]
    fn symphonia_decodes_whole_wav() {
        let bytes = wav_bytes(8_000, 1, 8_000);
        let mut dec = SymphoniaDecoder::new(None).with_extension("wav");
        let out = dec.decode(&bytes).unwrap();
        assert_eq!(out.handle.sample_rate(), 8_000);
        assert_eq!(out.handle.channels(), 1);
        assert!((out.duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn symphonia_rejects_truncated_wav() {
        let bytes = wav_bytes(8_000, 2, 8_000);
        let mut dec = SymphoniaDecoder::new(None);
        assert!(dec.decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn symphonia_rejects_empty_and_garbage() {
        let mut dec = SymphoniaDecoder::new(None);
        assert_eq!(dec.decode(&[]), Err(DecodeError::Empty));
        assert!(matches!(
            dec.decode(&[0x13; 64]),
            Err(DecodeError::Unsupported(_))
        ));
    }

    #[test]
    fn symphonia_resamples_to_output_rate() {
        let bytes = wav_bytes(8_000, 1, 8_000);
        let mut dec = SymphoniaDecoder::new(Some(16_000));
        let out = dec.decode(&bytes).unwrap();
        assert_eq!(out.handle.sample_rate(), 16_000);
        assert_eq!(out.handle.frames(), 16_000);
        assert!((out.duration - 1.0).abs() < 1e-9);
    }

    #[test]
    fn codec_name_from_params_maps_pcm() {
        let mut params = CodecParameters::new();
        params.codec = symphonia::core::codecs::CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }
}
