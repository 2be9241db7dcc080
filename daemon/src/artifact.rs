/// Evidence files: motion snapshots and loud-sound clips.
///
/// Files are named by local timestamp, `YYYY-MM-DD_HH-MM-SS.{jpg,wav}`, inside
/// the snapshots and audio-clips directories, which are created on first write.
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use image::RgbImage;
use tracing::{info, warn};

use crate::error::ArtifactError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const SECS_PER_DAY: u64 = 86_400;

/// Formats `ts` the way artifact names and log lines expect.
pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    snapshots_dir: PathBuf,
    audio_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(snapshots_dir: PathBuf, audio_dir: PathBuf) -> Self {
        Self {
            snapshots_dir,
            audio_dir,
        }
    }

    /// Encodes `frame` as JPEG into `<snapshots>/<timestamp>.jpg`.
    pub fn save_snapshot(
        &self,
        frame: &RgbImage,
        ts: &DateTime<Local>,
    ) -> Result<PathBuf, ArtifactError> {
        let path = prepare(&self.snapshots_dir, ts, "jpg")?;
        frame
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .map_err(|source| ArtifactError::Image {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Writes interleaved float samples as a 32-bit float WAV into
    /// `<audio_clips>/<timestamp>.wav`.
    pub fn save_clip(
        &self,
        samples: &[f32],
        channels: u16,
        sample_rate: u32,
        ts: &DateTime<Local>,
    ) -> Result<PathBuf, ArtifactError> {
        let path = prepare(&self.audio_dir, ts, "wav")?;
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let wav_err = |source| ArtifactError::Wav {
            path: path.clone(),
            source,
        };
        let mut writer = hound::WavWriter::create(&path, spec).map_err(wav_err)?;
        for &s in samples {
            writer.write_sample(s).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
        Ok(path)
    }
}

fn prepare(dir: &Path, ts: &DateTime<Local>, ext: &str) -> Result<PathBuf, ArtifactError> {
    std::fs::create_dir_all(dir).map_err(|source| ArtifactError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let stamp = format_timestamp(ts);
    let mut path = dir.join(format!("{stamp}.{ext}"));
    // Names have one-second resolution; never overwrite evidence an earlier alert
    // already points at.
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{stamp}_{n}.{ext}"));
        n += 1;
    }
    Ok(path)
}

/// Deletes regular files in `dir` whose modification time is older than `days` days.
/// Returns how many files were removed.  Zero days means cleanup is off.  A missing
/// directory is not an error; a file that cannot be inspected or removed is skipped
/// with a warning.
pub fn cleanup_older_than(dir: &Path, days: u32) -> std::io::Result<usize> {
    if days == 0 || !dir.exists() {
        return Ok(0);
    }
    let max_age = Duration::from_secs(u64::from(days) * SECS_PER_DAY);
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(t)) => t,
            Ok(None) => continue,
            Err(e) => {
                warn!("[cleanup] Cannot inspect {}: {e}", path.display());
                continue;
            }
        };
        if modified < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("[cleanup] Failed to remove {}: {e}", path.display()),
            }
        }
    }
    if removed > 0 {
        info!("[cleanup] Removed {removed} file(s) older than {days} day(s) from {}", dir.display());
    }
    Ok(removed)
}
