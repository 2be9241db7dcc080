/// Audio sensor: loud-sound detection on the microphone.
///
/// The device callback cuts its samples into fixed-size [`AudioBuffer`]s (see
/// [`BufferAssembler`]) and pushes them through a bounded channel; the sensor loop on
/// its own thread pulls them in arrival order and compares each buffer's volume with
/// the threshold.
///
/// Volume is the root-mean-square of all samples in the buffer, with no extra gain.
/// On that scale silence is 0.0 and a full-scale sine is ~0.707, so the default
/// threshold of 0.1 corresponds to a sound roughly 17 dB below full scale.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::artifact::ArtifactStore;
use crate::cancel::RunState;
use crate::cooldown::Cooldown;
use crate::dispatch::Dispatcher;
use crate::error::SensorError;
use crate::event::{Channel, DetectionEvent};

pub const DEFAULT_THRESHOLD: f64 = 0.1;
/// Buffers per second delivered to the sensor loop (100 ms each).
pub const BUFFERS_PER_SECOND: u32 = 10;
/// Capacity of the callback -> sensor channel, in buffers.
pub const CHANNEL_CAPACITY: usize = 32;
/// A live stream that delivers nothing for this long is treated as dead.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(5);

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// A fixed-length chunk of interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Root-mean-square over every sample; 0.0 for an empty buffer.
    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self.samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        (sum_sq / self.samples.len() as f64).sqrt()
    }
}

/// Delivers buffers to the sensor loop.
pub trait AudioSource {
    /// Waits up to `timeout` for the next buffer; `Ok(None)` means nothing arrived yet.
    /// An error means the stream is gone for good.
    fn next_buffer(&mut self, timeout: Duration) -> Result<Option<AudioBuffer>, SensorError>;

    /// Duration of one buffer; the loop never waits longer than this per call.
    fn buffer_period(&self) -> Duration;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn next_buffer(&mut self, timeout: Duration) -> Result<Option<AudioBuffer>, SensorError> {
        (**self).next_buffer(timeout)
    }

    fn buffer_period(&self) -> Duration {
        (**self).buffer_period()
    }
}

// ── Callback side ─────────────────────────────────────────────────────────────

/// Cuts the variable-sized slices a device callback receives into fixed-size
/// buffers and forwards them without ever blocking the callback.
pub struct BufferAssembler {
    samples_per_buffer: usize,
    channels: u16,
    sample_rate: u32,
    pending: Vec<f32>,
    tx: SyncSender<AudioBuffer>,
    dropped: Arc<AtomicU64>,
}

impl BufferAssembler {
    pub fn new(channels: u16, sample_rate: u32, tx: SyncSender<AudioBuffer>) -> Self {
        let frames = (sample_rate / BUFFERS_PER_SECOND).max(1) as usize;
        let samples_per_buffer = frames * usize::from(channels.max(1));
        Self {
            samples_per_buffer,
            channels,
            sample_rate,
            pending: Vec::with_capacity(samples_per_buffer),
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Appends samples, emitting every completed buffer.  When the consumer has
    /// fallen `CHANNEL_CAPACITY` buffers behind, new buffers are dropped instead.
    pub fn push<I: IntoIterator<Item = f32>>(&mut self, samples: I) {
        for s in samples {
            self.pending.push(s);
            if self.pending.len() == self.samples_per_buffer {
                let full = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.samples_per_buffer),
                );
                let buffer = AudioBuffer {
                    samples: full,
                    channels: self.channels,
                    sample_rate: self.sample_rate,
                };
                match self.tx.try_send(buffer) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// Shared counter of dropped buffers, for the consumer side to report.
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

/// Consumer end of a [`BufferAssembler`] channel.
pub struct ChannelSource {
    rx: Receiver<AudioBuffer>,
    dropped: Arc<AtomicU64>,
    reported_drops: u64,
    stall_timeout: Duration,
    last_delivery: Instant,
}

impl ChannelSource {
    pub fn new(rx: Receiver<AudioBuffer>, dropped: Arc<AtomicU64>) -> Self {
        Self {
            rx,
            dropped,
            reported_drops: 0,
            stall_timeout: STALL_TIMEOUT,
            last_delivery: Instant::now(),
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    fn report_drops(&mut self) {
        let total = self.dropped.load(Ordering::Relaxed);
        if total > self.reported_drops {
            warn!(
                "[audio] Sensor fell behind; {} buffer(s) dropped",
                total - self.reported_drops
            );
            self.reported_drops = total;
        }
    }
}

impl AudioSource for ChannelSource {
    fn next_buffer(&mut self, timeout: Duration) -> Result<Option<AudioBuffer>, SensorError> {
        match self.rx.recv_timeout(timeout) {
            Ok(buffer) => {
                self.last_delivery = Instant::now();
                self.report_drops();
                Ok(Some(buffer))
            }
            Err(RecvTimeoutError::Timeout) => {
                let silent_for = self.last_delivery.elapsed();
                if silent_for >= self.stall_timeout {
                    return Err(SensorError::fatal(
                        "microphone",
                        format!("no audio received for {:.1}s", silent_for.as_secs_f64()),
                    ));
                }
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(SensorError::fatal("microphone", "audio stream closed"))
            }
        }
    }

    fn buffer_period(&self) -> Duration {
        Duration::from_secs(1) / BUFFERS_PER_SECOND
    }
}

// ── Sensor ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub cooldown: Duration,
    /// RMS volume above which a buffer counts as loud.
    pub threshold: f64,
    /// Extra recording appended to a saved clip after the loud buffer.
    pub clip_extra: Duration,
    /// Log the per-second volume at info instead of debug.
    pub show_status: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            threshold: DEFAULT_THRESHOLD,
            clip_extra: Duration::ZERO,
            show_status: false,
        }
    }
}

pub struct AudioSensor {
    settings: AudioSettings,
    cooldown: Cooldown,
    /// Where clips go; `None` when `--save-audio` is off.
    clips: Option<ArtifactStore>,
    last_status: Instant,
    peak_since_status: f64,
}

impl AudioSensor {
    pub fn new(settings: AudioSettings, clips: Option<ArtifactStore>) -> Self {
        Self {
            cooldown: Cooldown::new(settings.cooldown),
            settings,
            clips,
            last_status: Instant::now(),
            peak_since_status: 0.0,
        }
    }

    /// Returns the buffer's volume if it crosses the threshold and the cooldown
    /// accepts a crossing at `now`.
    pub fn evaluate(&mut self, buffer: &AudioBuffer, now: Instant) -> Option<f64> {
        let volume = buffer.rms();
        self.peak_since_status = self.peak_since_status.max(volume);
        if volume > self.settings.threshold && self.cooldown.try_accept(now) {
            Some(volume)
        } else {
            None
        }
    }

    /// Consumes buffers until either token stops or the stream fails.  `stream_stop`
    /// is the lifecycle's explicit cancellation for the audio stream; `run_state` is
    /// the shared run flag.
    pub fn run<S: AudioSource>(
        mut self,
        source: &mut S,
        run_state: &RunState,
        stream_stop: &RunState,
        dispatcher: &Dispatcher,
    ) -> Result<(), SensorError> {
        let period = source.buffer_period();
        info!(
            "[audio] Audio detection started (threshold {:.3} RMS, cooldown {}s)",
            self.settings.threshold,
            self.cooldown.interval().as_secs_f64()
        );

        let keep_going = || run_state.is_running() && stream_stop.is_running();
        while keep_going() {
            let Some(buffer) = source.next_buffer(period)? else {
                continue;
            };
            let accepted = self.evaluate(&buffer, Instant::now());
            self.report_status();
            let Some(volume) = accepted else {
                continue;
            };

            let now = Local::now();
            let clip = self.clips.as_ref().and_then(|store| {
                save_clip(store, source, buffer, &now, self.settings.clip_extra, &keep_going)
            });
            dispatcher.dispatch(&DetectionEvent::new(Channel::Audio, now, volume).with_artifact(clip));
        }
        info!("[audio] Stopped");
        Ok(())
    }

    fn report_status(&mut self) {
        if self.last_status.elapsed() < STATUS_INTERVAL {
            return;
        }
        self.last_status = Instant::now();
        let peak = std::mem::take(&mut self.peak_since_status);
        if self.settings.show_status {
            info!("[audio] peak volume {peak:.3}");
        } else {
            debug!("[audio] peak volume {peak:.3}");
        }
    }
}

/// Writes the loud buffer, plus `extra` more seconds of stream, as one WAV file.
/// Recording the extra window stops early on cancellation or a stream error.
fn save_clip<S: AudioSource>(
    store: &ArtifactStore,
    source: &mut S,
    first: AudioBuffer,
    ts: &DateTime<Local>,
    extra: Duration,
    keep_going: &dyn Fn() -> bool,
) -> Option<std::path::PathBuf> {
    let AudioBuffer {
        mut samples,
        channels,
        sample_rate,
    } = first;

    if !extra.is_zero() {
        info!("[audio] Recording {}s of evidence", extra.as_secs_f64());
        let deadline = Instant::now() + extra;
        let period = source.buffer_period();
        while Instant::now() < deadline && keep_going() {
            match source.next_buffer(period) {
                Ok(Some(more)) => samples.extend_from_slice(&more.samples),
                Ok(None) => {}
                Err(e) => {
                    warn!("[audio] Clip cut short: {e}");
                    break;
                }
            }
        }
    }

    match store.save_clip(&samples, channels, sample_rate, ts) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("[audio] Clip not saved: {e}");
            None
        }
    }
}
