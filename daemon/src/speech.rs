/// Spoken alerts (`--speak`).
///
/// The platform speech engine is not guaranteed to be `Send`, so it lives on its own
/// thread and the dispatcher only queues text for it.  Speaking never blocks a
/// sensor loop.
use crate::error::SpeechError;
use crate::event::{Channel, DetectionEvent};

/// Says a line of text out loud.  Implemented by the engine thread and by test fakes.
pub trait Announcer: Send + Sync {
    fn say(&self, text: &str) -> Result<(), SpeechError>;
}

/// The sentence spoken for an event.
pub fn announcement_for(event: &DetectionEvent) -> String {
    match event.channel {
        Channel::Motion => "Warning. Motion detected.".to_string(),
        Channel::Audio => format!("Warning. Loud sound detected. Volume {:.2}", event.magnitude),
    }
}

// ── tts implementation ────────────────────────────────────────────────────────

#[cfg(feature = "speech")]
mod imp {
    use std::sync::mpsc::{self, Sender};
    use std::thread;

    use tracing::{debug, info, warn};
    use tts::Tts;

    use super::Announcer;
    use crate::error::SpeechError;

    pub struct Voice {
        queue: Sender<String>,
    }

    impl Announcer for Voice {
        fn say(&self, text: &str) -> Result<(), SpeechError> {
            self.queue
                .send(text.to_string())
                .map_err(|_| SpeechError::Stopped)
        }
    }

    pub fn open() -> Result<Voice, SpeechError> {
        let (queue, lines) = mpsc::channel::<String>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), SpeechError>>(1);

        thread::Builder::new()
            .name("speech".to_string())
            .spawn(move || {
                let mut tts = match Tts::default() {
                    Ok(tts) => tts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(SpeechError::Unavailable(e.to_string())));
                        return;
                    }
                };
                let loudest = tts.max_volume();
                if let Err(e) = tts.set_volume(loudest) {
                    debug!("[speech] Volume left at default: {e}");
                }
                let _ = ready_tx.send(Ok(()));

                // Ends once the dispatcher (and with it the sender) is dropped.
                for line in lines {
                    if let Err(e) = tts.speak(line, false) {
                        warn!("[speech] {e}");
                    }
                }
            })
            .map_err(|e| SpeechError::Unavailable(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| SpeechError::Stopped)??;
        info!("[speech] Spoken alerts on");
        Ok(Voice { queue })
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Starts the speech engine.
pub fn open_voice() -> Result<Box<dyn Announcer>, SpeechError> {
    #[cfg(feature = "speech")]
    {
        Ok(Box::new(imp::open()?))
    }
    #[cfg(not(feature = "speech"))]
    {
        Err(SpeechError::Unavailable(
            "built without speech support (enable the `speech` feature)".to_string(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::{Local, TimeZone};

    /// Records every line instead of speaking it; optionally fails each one.
    #[derive(Clone, Default)]
    pub struct RecordingVoice {
        pub spoken: Arc<Mutex<Vec<String>>>,
        pub fail: bool,
    }

    impl Announcer for RecordingVoice {
        fn say(&self, text: &str) -> Result<(), SpeechError> {
            self.spoken.lock().unwrap().push(text.to_string());
            if self.fail {
                Err(SpeechError::Stopped)
            } else {
                Ok(())
            }
        }
    }

    fn event(channel: Channel, magnitude: f64) -> DetectionEvent {
        let ts = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        DetectionEvent::new(channel, ts, magnitude)
    }

    #[test]
    fn loud_sound_announcement_reads_the_volume() {
        assert_eq!(
            announcement_for(&event(Channel::Audio, 0.4567)),
            "Warning. Loud sound detected. Volume 0.46"
        );
    }

    #[test]
    fn motion_announcement_ignores_magnitude() {
        assert_eq!(
            announcement_for(&event(Channel::Motion, 0.9)),
            "Warning. Motion detected."
        );
    }

    #[cfg(not(feature = "speech"))]
    #[test]
    fn open_fails_without_speech_feature() {
        let err = open_voice().err().expect("should fail");
        assert!(err.to_string().starts_with("speech unavailable"));
    }
}
