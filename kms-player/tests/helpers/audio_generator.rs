//! In-memory WAV stem generation
//!
//! Stems are 16-bit stereo so constant values that are multiples of 1/32768
//! survive encode and decode exactly.

use hound::{SampleFormat, WavSpec, WavWriter};
use kms_common::Track;
use kms_player::MemoryTrackSource;
use std::f32::consts::PI;
use std::io::Cursor;

/// Rate used by fixtures and offline engines (no resampling on load)
pub const TEST_SAMPLE_RATE: u32 = 8000;

fn write_wav(sample_rate: u32, frames: usize, mut sample: impl FnMut(usize) -> f32) -> Vec<u8> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let value = (sample(i).clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer.write_sample(value).unwrap();
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Stem holding one value for its whole length
///
/// `value` is quantized to 1/32767 steps.
pub fn constant_wav(seconds: f64, value: f32) -> Vec<u8> {
    let frames = (seconds * TEST_SAMPLE_RATE as f64).round() as usize;
    write_wav(TEST_SAMPLE_RATE, frames, |_| value)
}

pub fn sine_wav(sample_rate: u32, seconds: f64, frequency: f32, amplitude: f32) -> Vec<u8> {
    let frames = (seconds * sample_rate as f64).round() as usize;
    write_wav(sample_rate, frames, |i| {
        amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin()
    })
}

/// Source holding one song with silent-ish constant stems
pub fn song_source(song_id: &str, vocal_secs: f64, instrumental_secs: f64) -> MemoryTrackSource {
    let source = MemoryTrackSource::new();
    add_song(&source, song_id, vocal_secs, instrumental_secs);
    source
}

pub fn add_song(source: &MemoryTrackSource, song_id: &str, vocal_secs: f64, instrumental_secs: f64) {
    source.insert(song_id, Track::Vocal, constant_wav(vocal_secs, 0.25));
    source.insert(song_id, Track::Instrumental, constant_wav(instrumental_secs, 0.5));
}
