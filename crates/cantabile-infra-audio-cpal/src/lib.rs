use cantabile_ports::audio::{AudioError, AudioOutputPort, AudioRenderCallback, AudioStreamHandle};
use cantabile_ports::types::{AudioConfig, AudioOutputDevice, DeviceId};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig,
    SupportedStreamConfigRange,
};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Fallback when the device does not announce a fixed buffer size; the
/// scratch buffers grow on demand if a callback asks for more.
const DEFAULT_SCRATCH_FRAMES: usize = 4096;

pub struct CpalAudioOutputPort {
    host: cpal::Host,
}

struct SelectedStreamConfig {
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl CpalAudioOutputPort {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn with_host(host: cpal::Host) -> Self {
        Self { host }
    }

    fn list_devices_from_host(
        host: &cpal::Host,
    ) -> Result<Vec<(DeviceId, cpal::Device)>, AudioError> {
        let host_id = format!("{:?}", host.id());
        let devices = host
            .output_devices()
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        Ok(devices
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| "Unknown Output".to_string());
                (DeviceId(format!("cpal:{host_id}:{index}:{name}")), device)
            })
            .collect())
    }

    fn resolve_device(device_id: Option<&DeviceId>) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match device_id {
            None => host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceNotFound("default output".to_string())),
            Some(device_id) => Self::list_devices_from_host(&host)?
                .into_iter()
                .find(|(id, _)| id == device_id)
                .map(|(_, device)| device)
                .ok_or_else(|| AudioError::DeviceNotFound(device_id.to_string())),
        }
    }

    fn select_stream_config(
        device: &cpal::Device,
        desired: AudioConfig,
    ) -> Result<SelectedStreamConfig, AudioError> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        let chosen = select_supported_config(&mut supported, desired)?;
        let sample_format = chosen.sample_format();
        let mut config = chosen.config();
        config.buffer_size = match desired.buffer_size_frames {
            Some(frames) => BufferSize::Fixed(frames),
            None => BufferSize::Default,
        };

        Ok(SelectedStreamConfig {
            config,
            sample_format,
        })
    }
}

impl Default for CpalAudioOutputPort {
    fn default() -> Self {
        Self::new()
    }
}

/// The cpal stream is not `Send`, so it lives on its own thread until the
/// handle is closed.
pub struct CpalAudioStreamHandle {
    stop_tx: mpsc::Sender<()>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl AudioStreamHandle for CpalAudioStreamHandle {
    fn close(mut self: Box<Self>) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioOutputPort for CpalAudioOutputPort {
    fn list_outputs(&self) -> Result<Vec<AudioOutputDevice>, AudioError> {
        let devices = Self::list_devices_from_host(&self.host)?;

        Ok(devices
            .into_iter()
            .filter_map(|(id, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| "Unknown Output".to_string());
                let default_config = device.default_output_config().ok()?;
                Some(AudioOutputDevice {
                    id,
                    name,
                    default_config: AudioConfig {
                        sample_rate_hz: default_config.sample_rate().0,
                        channels: default_config.channels(),
                        buffer_size_frames: None,
                    },
                })
            })
            .collect())
    }

    fn open_output(
        &self,
        device_id: Option<&DeviceId>,
        config: AudioConfig,
        cb: Arc<dyn AudioRenderCallback>,
    ) -> Result<Box<dyn AudioStreamHandle>, AudioError> {
        let device_id = device_id.cloned();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let join_handle = thread::Builder::new()
            .name("cantabile-audio".to_string())
            .spawn(move || {
                let opened = Self::resolve_device(device_id.as_ref()).and_then(|device| {
                    let selected = Self::select_stream_config(&device, config)?;
                    let stream = build_stream(&device, &selected, cb)?;
                    stream
                        .play()
                        .map_err(|e| AudioError::Backend(e.to_string()))?;
                    tracing::info!(
                        device = %device.name().unwrap_or_default(),
                        sample_rate = selected.config.sample_rate.0,
                        format = ?selected.sample_format,
                        "audio stream started"
                    );
                    Ok(stream)
                });

                match opened {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|e| AudioError::Backend(e.to_string()))??;
        Ok(Box::new(CpalAudioStreamHandle {
            stop_tx,
            join_handle: Some(join_handle),
        }))
    }
}

fn build_stream(
    device: &cpal::Device,
    selected: &SelectedStreamConfig,
    cb: Arc<dyn AudioRenderCallback>,
) -> Result<cpal::Stream, AudioError> {
    let config = &selected.config;
    let stream = match selected.sample_format {
        SampleFormat::F32 => build_typed_stream::<f32>(device, config, cb),
        SampleFormat::I16 => build_typed_stream::<i16>(device, config, cb),
        SampleFormat::U16 => build_typed_stream::<u16>(device, config, cb),
        SampleFormat::I32 => build_typed_stream::<i32>(device, config, cb),
        other => {
            return Err(AudioError::UnsupportedConfig(format!(
                "sample format {other:?}"
            )))
        }
    };
    stream.map_err(|e| AudioError::Backend(e.to_string()))
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    cb: Arc<dyn AudioRenderCallback>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let initial_frames = match config.buffer_size {
        BufferSize::Fixed(frames) => frames as usize,
        BufferSize::Default => DEFAULT_SCRATCH_FRAMES,
    };
    let mut left: Vec<f32> = vec![0.0; initial_frames];
    let mut right: Vec<f32> = vec![0.0; initial_frames];
    let mut sample_time: u64 = 0;

    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            if frames > left.len() {
                left.resize(frames, 0.0);
                right.resize(frames, 0.0);
            }
            cb.render(sample_time, &mut left[..frames], &mut right[..frames]);
            write_interleaved(data, channels, &left[..frames], &right[..frames]);
            sample_time = sample_time.saturating_add(frames as u64);
        },
        |err| tracing::warn!(error = %err, "cpal stream error"),
        None,
    )
}

fn select_supported_config(
    supported: &mut dyn Iterator<Item = SupportedStreamConfigRange>,
    desired: AudioConfig,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let mut best: Option<cpal::SupportedStreamConfig> = None;
    let mut best_score: i32 = -1;

    for config_range in supported {
        if config_range.channels() != desired.channels {
            continue;
        }
        let min = config_range.min_sample_rate().0;
        let max = config_range.max_sample_rate().0;
        if desired.sample_rate_hz < min || desired.sample_rate_hz > max {
            continue;
        }

        let score = sample_format_score(config_range.sample_format());
        if score > best_score {
            best = Some(config_range.with_sample_rate(SampleRate(desired.sample_rate_hz)));
            best_score = score;
        }
    }

    best.ok_or_else(|| {
        AudioError::UnsupportedConfig(format!(
            "no {} channel stream at {} Hz",
            desired.channels, desired.sample_rate_hz
        ))
    })
}

fn sample_format_score(format: SampleFormat) -> i32 {
    match format {
        SampleFormat::F32 => 4,
        SampleFormat::I32 => 3,
        SampleFormat::I16 => 2,
        SampleFormat::U16 => 1,
        _ => 0,
    }
}

/// Writes the stereo mix into an interleaved buffer of any sample type.
/// Mono devices get the average; extra channels are silent.
fn write_interleaved<T>(data: &mut [T], channels: usize, left: &[f32], right: &[f32])
where
    T: SizedSample + FromSample<f32>,
{
    if channels == 0 {
        return;
    }
    for (frame, out) in data.chunks_mut(channels).enumerate() {
        let l = left.get(frame).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        let r = right.get(frame).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        match out {
            [mono] => *mono = T::from_sample((l + r) * 0.5),
            [first, second, rest @ ..] => {
                *first = T::from_sample(l);
                *second = T::from_sample(r);
                for sample in rest {
                    *sample = T::EQUILIBRIUM;
                }
            }
            [] => {}
        }
    }
}
