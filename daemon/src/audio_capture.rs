/// Microphone capture using `cpal` on the default input device.
///
/// The device callback converts whatever sample format the device offers to `f32`
/// and feeds a [`BufferAssembler`]; the sensor loop reads the other end of the
/// channel.  Dropping the returned source closes the stream.
///
/// Without the `microphone` feature the public API compiles but `open_microphone`
/// returns an error.
use crate::audio::AudioSource;
use crate::error::SensorError;

// ── cpal implementation ───────────────────────────────────────────────────────

#[cfg(feature = "microphone")]
mod imp {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, Sample, SizedSample};
    use tracing::{info, warn};

    use crate::audio::{AudioBuffer, AudioSource, BufferAssembler, ChannelSource, CHANNEL_CAPACITY};
    use crate::error::SensorError;

    fn fatal(e: impl std::fmt::Display) -> SensorError {
        SensorError::fatal("microphone", e.to_string())
    }

    pub struct Microphone {
        _stream: cpal::Stream,
        source: ChannelSource,
        /// Set by the stream's error callback when the device goes away.
        device_lost: Arc<AtomicBool>,
    }

    impl AudioSource for Microphone {
        fn next_buffer(&mut self, timeout: Duration) -> Result<Option<AudioBuffer>, SensorError> {
            if self.device_lost.load(Ordering::SeqCst) {
                return Err(SensorError::fatal("microphone", "input device disconnected"));
            }
            self.source.next_buffer(timeout)
        }

        fn buffer_period(&self) -> Duration {
            self.source.buffer_period()
        }
    }

    pub fn open() -> Result<Microphone, SensorError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| SensorError::fatal("microphone", "no default input device"))?;
        let supported = device.default_input_config().map_err(fatal)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
        let assembler = BufferAssembler::new(config.channels, config.sample_rate.0, tx);
        let source = ChannelSource::new(rx, assembler.drop_counter());
        let device_lost = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build::<f32>(&device, &config, assembler, &device_lost),
            cpal::SampleFormat::I16 => build::<i16>(&device, &config, assembler, &device_lost),
            cpal::SampleFormat::U16 => build::<u16>(&device, &config, assembler, &device_lost),
            other => {
                return Err(SensorError::fatal(
                    "microphone",
                    format!("unsupported sample format {other:?}"),
                ))
            }
        }?;
        stream.play().map_err(fatal)?;

        info!(
            "[audio] Microphone open: {} ({}ch @ {}Hz)",
            device.name().unwrap_or_else(|_| "unknown device".to_string()),
            config.channels,
            config.sample_rate.0
        );
        Ok(Microphone {
            _stream: stream,
            source,
            device_lost,
        })
    }

    fn build<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut assembler: BufferAssembler,
        device_lost: &Arc<AtomicBool>,
    ) -> Result<cpal::Stream, SensorError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let device_lost = Arc::clone(device_lost);
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    assembler.push(data.iter().map(|&s| f32::from_sample(s)));
                },
                move |err| {
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        device_lost.store(true, Ordering::SeqCst);
                    }
                    warn!("[audio] Stream error: {err}");
                },
                None,
            )
            .map_err(fatal)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Opens the default microphone.  Must be called on the thread that will read from
/// it: audio streams are not `Send` on every platform.
pub fn open_microphone() -> Result<Box<dyn AudioSource>, SensorError> {
    #[cfg(feature = "microphone")]
    {
        Ok(Box::new(imp::open()?))
    }
    #[cfg(not(feature = "microphone"))]
    {
        Err(SensorError::fatal(
            "microphone",
            "built without microphone support (enable the `microphone` feature)",
        ))
    }
}
