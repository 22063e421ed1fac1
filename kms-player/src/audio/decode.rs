//! Stem decoding using symphonia
//!
//! Decodes a whole stem from in-memory bytes into stereo f32 at the device
//! rate. Runs on the blocking pool; never call it from the control loop.
//!
//! # Sample Format
//!
//! - Output: Stereo f32 samples (interleaved: [L, R, L, R, ...])
//! - Mono files: duplicated to stereo
//! - Multi-channel: downmixed to stereo

use bytes::Bytes;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::resampler::Resampler;
use super::types::{TrackBuffer, CHANNELS};
use crate::error::{Error, Result};

/// Decode `bytes` into a stereo buffer at `output_rate`
///
/// Failures are `Error::Codec`; the caller attaches song and track context.
pub fn decode_track(bytes: Bytes, output_rate: u32) -> Result<TrackBuffer> {
    let (samples, native_rate) = decode_stereo(bytes)?;
    let samples = Resampler::resample(&samples, native_rate, output_rate, CHANNELS)?;
    Ok(TrackBuffer::new(samples, output_rate))
}

/// Decode to interleaved stereo at the file's native rate
fn decode_stereo(bytes: Bytes) -> Result<(Vec<f32>, u32)> {
    if bytes.is_empty() {
        return Err(codec("empty media body"));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| codec(format!("unrecognized format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| codec("no audio track found"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let native_rate = codec_params
        .sample_rate
        .ok_or_else(|| codec("unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| codec(format!("unsupported codec: {}", e)))?;

    let mut stereo = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(codec(format!("read failed: {}", e))),
        };

        // Skip packets from other tracks
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt frame; keep going like a browser decoder would
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(codec(format!("decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        append_stereo(&mut stereo, buf.samples(), channels);
    }

    if stereo.is_empty() {
        return Err(codec("no audio frames decoded"));
    }

    debug!(
        "Decoded {} frames at {}Hz",
        stereo.len() / CHANNELS,
        native_rate
    );
    Ok((stereo, native_rate))
}

fn codec(message: impl Into<String>) -> Error {
    Error::Codec(message.into())
}

/// Append interleaved `samples` with `channels` channels as stereo
fn append_stereo(out: &mut Vec<f32>, samples: &[f32], channels: usize) {
    match channels {
        0 => {}
        1 => {
            // Mono: duplicate to stereo
            for &s in samples {
                out.push(s);
                out.push(s);
            }
        }
        2 => out.extend_from_slice(samples),
        _ => {
            // Multi-channel: even channels to left, odd to right
            let scale = 2.0 / channels as f32;
            for frame in samples.chunks_exact(channels) {
                let (mut left, mut right) = (0.0f32, 0.0f32);
                for (ch, &s) in frame.iter().enumerate() {
                    if ch % 2 == 0 {
                        left += s;
                    } else {
                        right += s;
                    }
                }
                out.push(left * scale);
                out.push(right * scale);
            }
        }
    }
}
