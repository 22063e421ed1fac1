//! Line-oriented local controls
//!
//! Commands:
//!
//! ```text
//! play | pause | seek <seconds>
//! vol <vocal|instrumental> <0..1>
//! lyrics <small|medium|large>
//! offset <seconds>
//! song <id>
//! quit
//! ```

use kms_common::{ControlIntent, LyricsSize, Track};

use crate::device::DeviceCommand;
use crate::error::{Error, Result};

/// Parse one console line
pub fn parse_command(line: &str) -> Result<DeviceCommand> {
    let mut words = line.split_whitespace();
    let verb = words
        .next()
        .ok_or_else(|| invalid("empty command"))?
        .to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let intent = match (verb.as_str(), args.as_slice()) {
        ("quit" | "exit", []) => return Ok(DeviceCommand::Quit),
        ("play", []) => ControlIntent::Play,
        ("pause", []) => ControlIntent::Pause,
        ("seek", [time]) => ControlIntent::Seek(number(time)?),
        ("vol" | "volume", [track, value]) => {
            let track = match track.to_ascii_lowercase().as_str() {
                "vocal" | "v" => Track::Vocal,
                "instrumental" | "inst" | "i" => Track::Instrumental,
                other => return Err(invalid(&format!("unknown track '{}'", other))),
            };
            ControlIntent::SetVolume(track, number(value)? as f32)
        }
        ("lyrics", [size]) => ControlIntent::SetLyricsSize(size.parse::<LyricsSize>()?),
        ("offset", [offset]) => ControlIntent::SetLyricsOffset(number(offset)?),
        ("song", [song_id]) => ControlIntent::SetSong((*song_id).to_string()),
        (other, _) => return Err(invalid(&format!("unrecognized command '{}'", other.trim()))),
    };
    Ok(DeviceCommand::Intent(intent))
}

fn number(text: &str) -> Result<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(&format!("'{}' is not a number", text)))
}

fn invalid(message: &str) -> Error {
    Error::Common(kms_common::Error::InvalidInput(message.to_string()))
}
