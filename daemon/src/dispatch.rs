/// Alert dispatch: the shared path both sensor loops call into once a crossing has
/// survived its cooldown.
///
/// Order for every event: console line, log file line (when enabled), spoken
/// warning (with `--speak`), then email (when enabled for the channel).  Nothing in
/// here fails the caller; log, speech and mail problems are reported and the sensor
/// keeps running.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::artifact::format_timestamp;
use crate::config::AlertConfig;
use crate::event::{Channel, DetectionEvent};
use crate::mailer::Mailer;
use crate::speech::{announcement_for, Announcer};

pub struct Dispatcher {
    config: Arc<AlertConfig>,
    /// Append-only event log; `None` when `--log` was not given.
    log_file: Option<PathBuf>,
    mailer: Option<Box<dyn Mailer>>,
    voice: Option<Box<dyn Announcer>>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<AlertConfig>,
        log_file: Option<PathBuf>,
        mailer: Option<Box<dyn Mailer>>,
    ) -> Self {
        Self {
            config,
            log_file,
            mailer,
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: Box<dyn Announcer>) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn dispatch(&self, event: &DetectionEvent) {
        let stamp = format_timestamp(&event.timestamp);
        let description = event.description();
        info!("[{stamp}] {description}");

        if let Some(path) = &self.log_file {
            if let Err(e) = append_line(path, &format!("[{stamp}] {description}")) {
                warn!("[log] Failed to write {}: {e}", path.display());
            }
        }

        if let Some(voice) = &self.voice {
            if let Err(e) = voice.say(&announcement_for(event)) {
                warn!("[speech] Failed to announce {} alert: {e}", event.channel);
            }
        }

        if self.email_wanted(event.channel) {
            self.send_email(event);
        }
    }

    fn email_wanted(&self, channel: Channel) -> bool {
        self.config.email_enabled
            && match channel {
                Channel::Motion => self.config.motion_alerts_enabled,
                Channel::Audio => self.config.audio_alerts_enabled,
            }
    }

    fn send_email(&self, event: &DetectionEvent) {
        let Some(mailer) = &self.mailer else {
            warn!("[email] Alerts enabled but no mailer is configured");
            return;
        };

        let attachment = match event.artifact.as_deref() {
            Some(path) if path.is_file() => Some(path),
            Some(path) => {
                warn!("[email] Attachment not found, sending without it: {}", path.display());
                None
            }
            None => None,
        };

        let (subject, body) = message_for(event.channel);
        if let Err(e) = mailer.send(subject, body, attachment) {
            warn!("[email] Failed to send {} alert: {e}", event.channel);
        }
    }
}

/// Subject and body for a channel's alert email.
pub fn message_for(channel: Channel) -> (&'static str, &'static str) {
    match channel {
        Channel::Motion => ("MIRAGE-X Alert: Motion Detected", "Motion detected by MIRAGE-X."),
        Channel::Audio => (
            "MIRAGE-X Alert: Loud Sound Detected",
            "Loud audio detected by MIRAGE-X.",
        ),
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
