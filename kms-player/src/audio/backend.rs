//! Audio output backends
//!
//! A backend owns the device side of the render graph. Its clock is the
//! number of frames the device has actually consumed, so it is monotonic
//! and stands still while the output is suspended.
//!
//! - `CpalBackend` drives a real output device through cpal.
//! - `OfflineBackend` renders only when told to, for tests and headless use.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::graph::RenderGraph;
use crate::error::{Error, Result};

/// Preferred device rate; stems are resampled to whatever the device uses
pub const PREFERRED_SAMPLE_RATE: u32 = 44100;

/// Frames rendered per offline block (matches a typical device callback)
const OFFLINE_BLOCK_FRAMES: usize = 512;

/// Device side of the render graph
pub trait AudioBackend {
    /// Render graph fed by this backend
    fn graph(&self) -> &Arc<RenderGraph>;

    /// Output suspended (the clock is frozen until `resume`)
    fn is_suspended(&self) -> bool;

    /// Start consuming frames
    fn resume(&mut self) -> Result<()>;

    fn sample_rate(&self) -> u32 {
        self.graph().sample_rate()
    }

    /// Monotonic hardware clock in seconds
    fn current_time(&self) -> f64 {
        self.graph().current_time()
    }
}

/// cpal output stream feeding the render graph
///
/// The stream is built paused, like an audio context that has not yet been
/// allowed to start; the first play resumes it.
pub struct CpalBackend {
    device_name: String,
    config: StreamConfig,
    stream: Stream,
    graph: Arc<RenderGraph>,
    suspended: bool,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
}

impl CpalBackend {
    /// Names of the available output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device (None = default), falling back to the default
    /// device when the requested one is missing
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(device) => device,
                    None => {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (config, sample_format) = Self::best_config(&device)?;
        info!(
            "Audio device {}: {}Hz, {} channels, {:?}",
            device_name, config.sample_rate.0, config.channels, sample_format
        );

        let graph = Arc::new(RenderGraph::new(config.sample_rate.0));
        let error_flag = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, &graph, &error_flag)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, &graph, &error_flag)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, &graph, &error_flag)?,
            other => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };

        // Some hosts start streams on build
        if let Err(e) = stream.pause() {
            debug!("Could not pause new stream: {}", e);
        }

        Ok(Self {
            device_name,
            config,
            stream,
            graph,
            suspended: true,
            error_flag,
        })
    }

    /// Prefer stereo f32 at 44.1kHz, else the device default
    fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

        let preferred = supported.find(|c| {
            c.channels() == 2
                && c.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
                && c.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
                && c.sample_format() == SampleFormat::F32
        });
        if let Some(c) = preferred {
            let format = c.sample_format();
            return Ok((
                c.with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE)).config(),
                format,
            ));
        }

        let default = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        Ok((default.config(), default.sample_format()))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// True once the stream reported an error
    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }
}

impl AudioBackend for CpalBackend {
    fn graph(&self) -> &Arc<RenderGraph> {
        &self.graph
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> Result<()> {
        if !self.suspended {
            return Ok(());
        }
        self.stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.suspended = false;
        info!("Audio output resumed on {}", self.device_name);
        Ok(())
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    graph: &Arc<RenderGraph>,
    error_flag: &Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let graph = Arc::clone(graph);
    let error_flag = Arc::clone(error_flag);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                graph.render(&mut scratch, channels);
                for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(s);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_flag.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Backend whose clock advances only through `advance`
///
/// Clones share the same graph, so a test can keep a handle while the
/// engine owns another.
#[derive(Clone)]
pub struct OfflineBackend {
    graph: Arc<RenderGraph>,
    suspended: Arc<AtomicBool>,
}

impl OfflineBackend {
    /// New backend, suspended until the first `resume`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            graph: Arc::new(RenderGraph::new(sample_rate)),
            suspended: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Render `seconds` of output and return it (interleaved stereo)
    ///
    /// A suspended backend renders nothing and its clock stays put.
    pub fn advance(&self, seconds: f64) -> Vec<f32> {
        if self.suspended.load(Ordering::SeqCst) {
            debug!("Offline backend suspended, clock not advanced");
            return Vec::new();
        }
        let frames = self.graph.seconds_to_frames(seconds) as usize;
        let mut out = vec![0.0; frames * 2];
        for block in out.chunks_mut(OFFLINE_BLOCK_FRAMES * 2) {
            self.graph.render(block, 2);
        }
        out
    }
}

impl AudioBackend for OfflineBackend {
    fn graph(&self) -> &Arc<RenderGraph> {
        &self.graph
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn resume(&mut self) -> Result<()> {
        self.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }
}
