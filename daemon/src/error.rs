/// Error taxonomy for the detection pipeline.
///
/// Only [`SensorError`] is allowed to end a sensor loop.  The others are caught where
/// they happen, logged, and the event (or the session) carries on.
use std::path::PathBuf;

use thiserror::Error;

/// The camera or microphone is unavailable or stopped delivering data.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{sensor} unavailable: {reason}")]
    Fatal { sensor: &'static str, reason: String },
}

impl SensorError {
    pub fn fatal(sensor: &'static str, reason: impl Into<String>) -> Self {
        SensorError::Fatal {
            sensor,
            reason: reason.into(),
        }
    }
}

/// Building, connecting, authenticating or sending an alert email failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid message: {0}")]
    Message(String),
    #[error("failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("smtp: {0}")]
    Smtp(String),
}

/// A snapshot or audio clip could not be written to disk.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode snapshot {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write audio clip {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

/// The live preview window could not be opened or drawn.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("preview unavailable: {0}")]
    Unavailable(String),
    #[error("preview window: {0}")]
    Window(String),
}

/// Spoken alerts could not be produced.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech unavailable: {0}")]
    Unavailable(String),
    #[error("speech engine stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_error_names_the_sensor() {
        let err = SensorError::fatal("camera", "device 0 not found");
        assert_eq!(err.to_string(), "camera unavailable: device 0 not found");
    }

    #[test]
    fn transport_error_keeps_underlying_message() {
        let err = TransportError::Smtp("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
