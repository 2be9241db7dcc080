use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::audio::DEFAULT_THRESHOLD;

/// MIRAGE-X: watches a webcam for motion and a microphone for loud sounds, and raises
/// an alert (log line, optional snapshot or clip, optional email) for each detection.
#[derive(Parser, Debug)]
#[command(name = "mirage", version, about)]
pub struct Cli {
    /// Run without the live camera preview and the once-per-second status output.
    #[arg(long)]
    pub headless: bool,

    /// Minimum seconds between two alerts of the same kind.
    #[arg(long, default_value_t = 5)]
    pub cooldown: u64,

    /// Brighten frames before motion analysis (low light).  Must be > 0.
    #[arg(long, value_parser = parse_gamma)]
    pub gamma: Option<f64>,

    /// Disable loud-sound detection.
    #[arg(long)]
    pub no_audio: bool,

    /// Disable motion detection.
    #[arg(long)]
    pub no_video: bool,

    /// Save a WAV clip for every loud-sound alert.
    #[arg(long)]
    pub save_audio: bool,

    /// Save a JPEG snapshot for every motion alert.
    #[arg(long)]
    pub save_snaps: bool,

    /// Append every alert to log.txt in the data directory.
    #[arg(long)]
    pub log: bool,

    /// Delete snapshots and clips older than this many days at startup.
    #[arg(long, value_name = "DAYS", value_parser = clap::value_parser!(u32).range(1..))]
    pub cleanup_days: Option<u32>,

    /// Directory holding config.toml, log.txt, snapshots/ and audio_clips/.
    #[arg(long, env = "MIRAGE_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Config file path; defaults to <data-dir>/config.toml.
    #[arg(long, env = "MIRAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run the email setup prompts, even if a config file exists.
    #[arg(long)]
    pub setup: bool,

    /// RMS volume (0.0 to 1.0) above which a sound counts as loud.
    #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_parser = parse_threshold)]
    pub threshold: f64,

    /// Extra seconds of audio recorded into a clip after the loud sound.
    #[arg(long, default_value_t = 0)]
    pub clip_seconds: u64,

    /// Webcam index.
    #[arg(long, default_value_t = 0)]
    pub camera: u32,

    /// Speak every alert aloud.
    #[arg(long)]
    pub speak: bool,

    /// Send one test email with the configured settings, then exit.
    #[arg(long)]
    pub test_email: bool,
}

impl Cli {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown)
    }

    pub fn clip_extra(&self) -> Duration {
        Duration::from_secs(self.clip_seconds)
    }
}

fn parse_gamma(s: &str) -> Result<f64, String> {
    let gamma: f64 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if gamma.is_finite() && gamma > 0.0 {
        Ok(gamma)
    } else {
        Err(format!("gamma must be greater than 0 (got {s})"))
    }
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let threshold: f64 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(threshold)
    } else {
        Err(format!("threshold must be a non-negative number (got {s})"))
    }
}
