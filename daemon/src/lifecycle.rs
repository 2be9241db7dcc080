/// Lifecycle of a monitoring session: launches the enabled sensors, listens for
/// OS termination requests, and tears everything down exactly once.
///
///   Idle -> Running -> Stopping -> Stopped
///
/// Each sensor runs on its own blocking thread and opens its device there.  The
/// shared [`RunState`] tells both loops to finish; the audio loop additionally gets
/// an explicit stream stop so a quiet microphone cannot hold it open.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::artifact::ArtifactStore;
use crate::audio::{AudioSensor, AudioSettings, AudioSource};
use crate::cancel::RunState;
use crate::dispatch::Dispatcher;
use crate::error::{PreviewError, SensorError};
use crate::motion::{FrameSource, MotionExit, MotionSensor, MotionSettings};
use crate::preview::Preview;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Idle,
            1 => LifecycleState::Running,
            2 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }
}

pub type CameraOpener = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>, SensorError> + Send>;
pub type MicrophoneOpener = Box<dyn FnOnce() -> Result<Box<dyn AudioSource>, SensorError> + Send>;
pub type PreviewOpener = Box<dyn FnOnce() -> Result<Box<dyn Preview>, PreviewError> + Send>;

/// Everything needed to start the motion sensor on its own thread.
pub struct MotionLaunch {
    pub open: CameraOpener,
    pub settings: MotionSettings,
    pub snapshots: Option<ArtifactStore>,
    /// Live window; `None` when running headless.
    pub preview: Option<PreviewOpener>,
}

/// Everything needed to start the audio sensor on its own thread.
pub struct AudioLaunch {
    pub open: MicrophoneOpener,
    pub settings: AudioSettings,
    pub clips: Option<ArtifactStore>,
}

#[derive(Clone)]
pub struct Lifecycle {
    state: Arc<AtomicU8>,
    run_state: RunState,
    /// Explicit stop for the audio stream, separate from the shared run flag.
    stream_stop: RunState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(LifecycleState::Idle as u8)),
            run_state: RunState::new(),
            stream_stop: RunState::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves to Stopping and signals both loops.  Only the first request does
    /// anything; later ones (a second Ctrl+C, a sensor failing during teardown)
    /// return `false`.
    pub fn request_stop(&self, reason: &str) -> bool {
        let won = [LifecycleState::Idle, LifecycleState::Running]
            .iter()
            .any(|&from| self.transition(from, LifecycleState::Stopping));
        if !won {
            return false;
        }
        info!("[lifecycle] Stopping: {reason}");
        self.run_state.stop();
        self.stream_stop.stop();
        true
    }

    /// Resolves on Ctrl+C or SIGTERM (then requests a stop), or once the session
    /// stops for any other reason.  Does nothing beyond triggering the stop.
    pub async fn watch_signals(self) {
        tokio::select! {
            _ = shutdown_signal() => {
                self.request_stop("termination signal received");
            }
            _ = self.run_state.stopped() => {}
        }
    }

    /// Launches the given sensors and waits for both loops to return.
    pub async fn run(
        &self,
        dispatcher: Arc<Dispatcher>,
        motion: Option<MotionLaunch>,
        audio: Option<AudioLaunch>,
    ) {
        let mut handles = vec![];

        // ── Motion sensor thread ──────────────────────────────────────────────
        if let Some(launch) = motion {
            let lifecycle = self.clone();
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::task::spawn_blocking(move || {
                let result = (launch.open)().and_then(|camera| {
                    let mut sensor = MotionSensor::new(camera, launch.settings, launch.snapshots);
                    if let Some(open_preview) = launch.preview {
                        match open_preview() {
                            Ok(preview) => sensor = sensor.with_preview(preview),
                            Err(e) => warn!("[motion] {e}; continuing without preview"),
                        }
                    }
                    sensor.run(&lifecycle.run_state, &dispatcher)
                });
                match result {
                    Ok(MotionExit::PreviewClosed) => {
                        lifecycle.request_stop("preview closed");
                    }
                    Ok(MotionExit::Stopped) => {}
                    Err(e) => {
                        error!("[motion] {e}");
                        lifecycle.request_stop("camera failure");
                    }
                }
            }));
        }

        // ── Audio sensor thread ───────────────────────────────────────────────
        if let Some(launch) = audio {
            let lifecycle = self.clone();
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::task::spawn_blocking(move || {
                let result = (launch.open)().and_then(|mut microphone| {
                    AudioSensor::new(launch.settings, launch.clips).run(
                        &mut microphone,
                        &lifecycle.run_state,
                        &lifecycle.stream_stop,
                        &dispatcher,
                    )
                });
                if let Err(e) = result {
                    error!("[audio] {e}");
                    lifecycle.request_stop("microphone failure");
                }
            }));
        }

        if handles.is_empty() {
            warn!("[lifecycle] No sensors enabled; nothing to do");
        } else if self.transition(LifecycleState::Idle, LifecycleState::Running) {
            info!("[lifecycle] Running ({} sensor(s))", handles.len());
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("[lifecycle] Sensor thread panicked: {e}");
                self.request_stop("sensor thread panicked");
            }
        }

        // Every loop has returned; make sure nothing is left waiting on the tokens.
        self.request_stop("all sensors finished");
        self.state
            .store(LifecycleState::Stopped as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves on the first Ctrl+C (or SIGTERM on Unix).  If the handlers cannot be
/// installed it never resolves, leaving shutdown to the sensors.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("[lifecycle] Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("[lifecycle] Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
