//! # Audio Decoding and Encoding
//!
//! Turns stored clips into interleaved `f32` PCM and turns PCM back into MP3.
//!
//! ## Decoders:
//! - **WAV**: read with the `wav` crate (fast path for plain PCM/float WAV)
//! - **Everything else** (and WAV files the `wav` crate rejects): `symphonia`
//!
//! ## Encoder:
//! - **MP3** through LAME (`mp3lame-encoder`), constant bitrate

use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::sniff;

/// Sample rates LAME can encode without resampling.
pub const MP3_SAMPLE_RATES: &[u32] = &[8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000];

/// Bitrates accepted for the merged artifact (kbps).
pub const SUPPORTED_BITRATES: &[u32] = &[64, 96, 128, 160, 192, 256, 320];

/// Decoded audio: interleaved samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmTrack {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmTrack {
    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            samples: Vec::new(),
        }
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

/// Decode one clip. Errors are human-readable reasons, the caller decides whether a
/// failure is fatal.
pub fn decode_clip(bytes: &[u8]) -> Result<PcmTrack, String> {
    let detected = sniff::detect(bytes);
    let track = match detected {
        Some("audio/x-wav") | Some("audio/wav") => {
            decode_wav(bytes).or_else(|wav_err| {
                decode_with_symphonia(bytes, Some("wav"))
                    .map_err(|e| format!("{} (symphonia fallback: {})", wav_err, e))
            })?
        }
        other => decode_with_symphonia(bytes, other.and_then(sniff::extension_for))?,
    };

    if track.channels == 0 || track.sample_rate == 0 {
        return Err("stream declares no channels or sample rate".to_string());
    }
    if track.frames() == 0 {
        return Err("stream contains no audio frames".to_string());
    }
    Ok(track)
}

fn decode_wav(bytes: &[u8]) -> Result<PcmTrack, String> {
    let mut cursor = Cursor::new(bytes);
    let (header, data) = wav::read(&mut cursor).map_err(|e| format!("invalid WAV: {}", e))?;

    let samples: Vec<f32> = match data {
        wav::BitDepth::Eight(raw) => raw.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(raw) => raw.iter().map(|&s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(raw) => raw.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(raw) => raw,
        wav::BitDepth::Empty => Vec::new(),
    };

    Ok(PcmTrack {
        sample_rate: header.sampling_rate,
        channels: header.channel_count,
        samples: samples.into_iter().map(sanitize).collect(),
    })
}

fn decode_with_symphonia(bytes: &[u8], extension: Option<&str>) -> Result<PcmTrack, String> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| format!("unrecognised container: {}", e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| "no decodable audio track".to_string())?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("unsupported codec: {}", e))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(format!("demux error: {}", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(buffer.samples().iter().copied().map(sanitize));
            }
            // A corrupt packet is skipped, the rest of the stream is still usable
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(format!("decode error: {}", e)),
        }
    }

    Ok(PcmTrack {
        sample_rate,
        channels,
        samples,
    })
}

fn sanitize(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Encode a mono or stereo track as constant-bitrate MP3.
pub fn encode_mp3(track: &PcmTrack, bitrate_kbps: u32) -> Result<Vec<u8>, String> {
    if !MP3_SAMPLE_RATES.contains(&track.sample_rate) {
        return Err(format!("sample rate {} Hz cannot be encoded as MP3", track.sample_rate));
    }
    if !(1..=2).contains(&track.channels) {
        return Err(format!("{} channels cannot be encoded as MP3", track.channels));
    }

    let mut builder = Builder::new().ok_or_else(|| "failed to initialise LAME".to_string())?;
    builder
        .set_num_channels(track.channels as u8)
        .map_err(|e| format!("LAME channels: {:?}", e))?;
    builder
        .set_sample_rate(track.sample_rate)
        .map_err(|e| format!("LAME sample rate: {:?}", e))?;
    builder
        .set_brate(bitrate(bitrate_kbps)?)
        .map_err(|e| format!("LAME bitrate: {:?}", e))?;
    builder
        .set_quality(Quality::Good)
        .map_err(|e| format!("LAME quality: {:?}", e))?;
    let mut encoder = builder.build().map_err(|e| format!("LAME build: {:?}", e))?;

    let pcm: Vec<i16> = track
        .samples
        .iter()
        .map(|&s| (s * 32767.0).round().clamp(-32768.0, 32767.0) as i16)
        .collect();

    // Encode in slices so the output buffer stays bounded
    const FRAMES_PER_CALL: usize = 8192;
    let channels = track.channels as usize;
    let mut out = Vec::new();
    for chunk in pcm.chunks(FRAMES_PER_CALL * channels) {
        out.reserve(mp3lame_encoder::max_required_buffer_size(chunk.len() / channels));
        let result = if channels == 1 {
            encoder.encode_to_vec(MonoPcm(chunk), &mut out)
        } else {
            encoder.encode_to_vec(InterleavedPcm(chunk), &mut out)
        };
        result.map_err(|e| format!("LAME encode: {:?}", e))?;
    }

    out.reserve(7200);
    encoder
        .flush_to_vec::<FlushNoGap>(&mut out)
        .map_err(|e| format!("LAME flush: {:?}", e))?;
    Ok(out)
}

fn bitrate(kbps: u32) -> Result<Bitrate, String> {
    Ok(match kbps {
        64 => Bitrate::Kbps64,
        96 => Bitrate::Kbps96,
        128 => Bitrate::Kbps128,
        160 => Bitrate::Kbps160,
        192 => Bitrate::Kbps192,
        256 => Bitrate::Kbps256,
        320 => Bitrate::Kbps320,
        other => return Err(format!("unsupported MP3 bitrate {} kbps", other)),
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_decode_wav_constant() {
        let bytes = wav_constant(16000, 1, 0.5, 0.25);
        let track = decode_clip(&bytes).unwrap();
        assert_eq!(track.sample_rate, 16000);
        assert_eq!(track.channels, 1);
        assert_eq!(track.frames(), 8000);
        assert!((track.samples[100] - 0.25).abs() < 0.001);
        assert!((track.duration_seconds() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_decode_stereo_wav() {
        let bytes = wav_constant(22050, 2, 0.2, -0.5);
        let track = decode_clip(&bytes).unwrap();
        assert_eq!(track.channels, 2);
        assert_eq!(track.frames(), 4410);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_clip(&wav_garbage()).is_err());
        assert!(decode_clip(b"definitely not audio").is_err());
    }

    #[test]
    fn test_encode_then_decode_keeps_duration() {
        let source = decode_clip(&wav_tone(44100, 1.0)).unwrap();
        let mp3 = encode_mp3(&source, 128).unwrap();
        assert_eq!(sniff::detect(&mp3), Some("audio/mpeg"));

        let decoded = decode_clip(&mp3).unwrap();
        assert_eq!(decoded.sample_rate, 44100);
        // Encoder delay and frame padding add a few milliseconds at most
        assert!((decoded.duration_seconds() - 1.0).abs() < 0.1, "{}", decoded.duration_seconds());
    }

    #[test]
    fn test_encode_rejects_bad_layouts() {
        let track = PcmTrack {
            sample_rate: 12345,
            channels: 1,
            samples: vec![0.0; 100],
        };
        assert!(encode_mp3(&track, 128).is_err());

        let track = PcmTrack {
            sample_rate: 44100,
            channels: 1,
            samples: vec![0.0; 100],
        };
        assert!(encode_mp3(&track, 100).is_err());
    }
}
