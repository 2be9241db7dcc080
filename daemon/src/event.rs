use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};

/// Which sensor raised an event.  Each channel has its own cooldown and its own
/// email toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Frame-to-frame change on the camera feed.
    Motion,
    /// Microphone volume above the threshold.
    Audio,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Motion => f.write_str("motion"),
            Channel::Audio => f.write_str("audio"),
        }
    }
}

/// A threshold crossing that survived its channel's cooldown.
/// Handed straight to the dispatcher; never stored.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub channel: Channel,
    pub timestamp: DateTime<Local>,
    /// Changed-pixel fraction for motion, RMS volume for audio.
    pub magnitude: f64,
    /// Snapshot or audio clip saved for this event, if any.
    pub artifact: Option<PathBuf>,
}

impl DetectionEvent {
    pub fn new(channel: Channel, timestamp: DateTime<Local>, magnitude: f64) -> Self {
        Self {
            channel,
            timestamp,
            magnitude,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Option<PathBuf>) -> Self {
        self.artifact = artifact;
        self
    }

    /// Human-readable description used for the console and the log file.
    pub fn description(&self) -> String {
        match self.channel {
            Channel::Motion => "Motion detected.".to_string(),
            Channel::Audio => format!("Loud audio detected. RMS volume: {:.3}", self.magnitude),
        }
    }
}
