//! # Merge Engine
//!
//! Concatenates a session's clips into one MP3.
//!
//! ## Algorithm:
//! 1. Decode every clip in the given order; a clip that fails to decode is logged and
//!    skipped without aborting the merge
//! 2. Bring the decoded tracks to one layout: the highest channel count (at most
//!    stereo) and the highest sample rate, snapped to 44.1 kHz if MP3 cannot carry it
//! 3. Append the tracks back to back (no crossfade, no loudness changes)
//! 4. Fail if nothing decodable was left, otherwise encode the buffer as MP3
//!
//! Decoding and encoding are CPU-bound; callers run [`MergeEngine::merge`] on the
//! blocking thread pool.

use tracing::{debug, warn};

use super::codec::{self, PcmTrack, MP3_SAMPLE_RATES};

const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// One clip handed to the engine.
#[derive(Debug, Clone)]
pub struct ClipInput {
    /// Used in log lines only
    pub label: String,
    pub bytes: Vec<u8>,
}

/// Result of a successful merge.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub mp3: Vec<u8>,
    pub duration_seconds: f64,
    pub clips_merged: usize,
    pub clips_skipped: usize,
}

/// Why a merge produced no artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeFailure {
    /// Empty input or every clip undecodable
    NoAudio { skipped: usize },
    Encode(String),
}

impl std::fmt::Display for MergeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeFailure::NoAudio { skipped: 0 } => write!(f, "no clips to merge"),
            MergeFailure::NoAudio { skipped } => {
                write!(f, "none of the {} clips could be decoded", skipped)
            }
            MergeFailure::Encode(reason) => write!(f, "failed to encode artifact: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeEngine {
    bitrate_kbps: u32,
}

impl MergeEngine {
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }

    pub fn merge(&self, clips: Vec<ClipInput>) -> Result<MergeOutput, MergeFailure> {
        let mut tracks = Vec::with_capacity(clips.len());
        let mut skipped = 0;

        for clip in clips {
            match codec::decode_clip(&clip.bytes) {
                Ok(track) => {
                    debug!(
                        clip = %clip.label,
                        sample_rate = track.sample_rate,
                        channels = track.channels,
                        seconds = track.duration_seconds(),
                        "Decoded clip"
                    );
                    tracks.push(track);
                }
                Err(reason) => {
                    warn!(clip = %clip.label, reason = %reason, "Skipping undecodable clip");
                    skipped += 1;
                }
            }
        }

        let merged = concatenate(&tracks);
        if merged.frames() == 0 {
            return Err(MergeFailure::NoAudio { skipped });
        }

        let mp3 = codec::encode_mp3(&merged, self.bitrate_kbps).map_err(MergeFailure::Encode)?;
        Ok(MergeOutput {
            mp3,
            duration_seconds: merged.duration_seconds(),
            clips_merged: tracks.len(),
            clips_skipped: skipped,
        })
    }
}

/// Append `tracks` in order after converting them to a common layout.
pub fn concatenate(tracks: &[PcmTrack]) -> PcmTrack {
    let channels = tracks.iter().map(|t| t.channels).max().unwrap_or(1).clamp(1, 2);
    let mut sample_rate = tracks
        .iter()
        .map(|t| t.sample_rate)
        .max()
        .unwrap_or(FALLBACK_SAMPLE_RATE);
    if !MP3_SAMPLE_RATES.contains(&sample_rate) {
        sample_rate = FALLBACK_SAMPLE_RATE;
    }

    let mut merged = PcmTrack::empty(sample_rate, channels);
    for track in tracks {
        let remixed = remix(track, channels);
        merged.samples.extend(resample(&remixed, channels, track.sample_rate, sample_rate));
    }
    merged
}

/// Convert interleaved samples to `target` channels.
///
/// Mono is duplicated. Channels past `target` are averaged, and that average is mixed
/// evenly into every kept channel.
fn remix(track: &PcmTrack, target: u16) -> Vec<f32> {
    let source = track.channels.max(1) as usize;
    let target = target as usize;
    if source == target {
        return track.samples.clone();
    }

    let mut out = Vec::with_capacity(track.frames() * target);
    for frame in track.samples.chunks_exact(source) {
        if source < target {
            out.extend(std::iter::repeat(frame[0]).take(target));
            continue;
        }
        let extra = &frame[target..];
        let extra_mean = extra.iter().sum::<f32>() / extra.len() as f32;
        out.extend(frame[..target].iter().map(|s| (s + extra_mean) / 2.0));
    }
    out
}

/// Linear-interpolation resampling of interleaved samples.
fn resample(samples: &[f32], channels: u16, from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let channels = channels as usize;
    let in_frames = samples.len() / channels;
    let out_frames = ((in_frames as u64 * to as u64) / from as u64) as usize;
    let step = from as f64 / to as f64;

    let mut out = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        let position = i as f64 * step;
        let left = (position.floor() as usize).min(in_frames - 1);
        let right = (left + 1).min(in_frames - 1);
        let weight = (position - left as f64) as f32;
        for c in 0..channels {
            let a = samples[left * channels + c];
            let b = samples[right * channels + c];
            out.push(a + (b - a) * weight);
        }
    }
    out
}
