/// File layout under the data directory (the working directory by default):
///   - config.toml     Email settings, written by the setup prompts.
///   - log.txt         One line per accepted event, when `--log` is given.
///   - snapshots/      `<timestamp>.jpg` motion snapshots.
///   - audio_clips/    `<timestamp>.wav` loud-sound clips.
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const LOG_FILE_NAME: &str = "log.txt";
pub const SNAPSHOTS_DIR_NAME: &str = "snapshots";
pub const AUDIO_CLIPS_DIR_NAME: &str = "audio_clips";

#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE_NAME)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR_NAME)
    }

    pub fn audio_clips_dir(&self) -> PathBuf {
        self.root.join(AUDIO_CLIPS_DIR_NAME)
    }
}
