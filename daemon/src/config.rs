use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Root configuration structure. Deserialized from `<data-dir>/config.toml`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub email_alerts: EmailAlertsConfig,
}

/// The `[email_alerts]` table.  The SMTP password is deliberately absent: it is
/// supplied at runtime and never written to disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailAlertsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Address used as the From header and as the SMTP login.
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub receiver_email: String,
    /// Email on motion events.
    #[serde(default = "default_true")]
    pub on_motion: bool,
    /// Email on loud-sound events.
    #[serde(default = "default_true")]
    pub on_audio: bool,
}

impl Default for EmailAlertsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: DEFAULT_SMTP_SERVER.to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
            sender_email: String::new(),
            receiver_email: String::new(),
            on_motion: true,
            on_audio: true,
        }
    }
}

impl Config {
    /// Rejects settings that would only fail later, at send time.
    /// Disabled email alerts are never checked.
    pub fn validate(&self) -> Result<()> {
        let email = &self.email_alerts;
        if !email.enabled {
            return Ok(());
        }
        if email.smtp_server.trim().is_empty() {
            bail!("email_alerts.smtp_server must not be empty");
        }
        if email.smtp_port == 0 {
            bail!("email_alerts.smtp_port must be non-zero");
        }
        email
            .sender_email
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid email_alerts.sender_email: {:?}", email.sender_email))?;
        email
            .receiver_email
            .parse::<Mailbox>()
            .with_context(|| {
                format!("Invalid email_alerts.receiver_email: {:?}", email.receiver_email)
            })?;
        Ok(())
    }

    /// Writes the config as pretty TOML, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

/// Loads and validates the config file at `path`, returning `Config::default()` if the
/// file does not exist.  Returns an error if the file exists but cannot be read,
/// parsed or validated.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Everything the dispatcher and mailer need, fixed at startup and shared read-only.
#[derive(Clone)]
pub struct AlertConfig {
    pub email_enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender: String,
    pub recipient: String,
    pub credential: String,
    pub motion_alerts_enabled: bool,
    pub audio_alerts_enabled: bool,
}

impl AlertConfig {
    pub fn from_config(config: &Config, credential: String) -> Self {
        let email = &config.email_alerts;
        Self {
            email_enabled: email.enabled,
            smtp_host: email.smtp_server.clone(),
            smtp_port: email.smtp_port,
            sender: email.sender_email.clone(),
            recipient: email.receiver_email.clone(),
            credential,
            motion_alerts_enabled: email.on_motion,
            audio_alerts_enabled: email.on_audio,
        }
    }

    /// Email switched off entirely.
    pub fn disabled() -> Self {
        Self::from_config(&Config::default(), String::new())
    }
}

impl fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertConfig")
            .field("email_enabled", &self.email_enabled)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("credential", &"<redacted>")
            .field("motion_alerts_enabled", &self.motion_alerts_enabled)
            .field("audio_alerts_enabled", &self.audio_alerts_enabled)
            .finish()
    }
}

fn default_smtp_server() -> String {
    DEFAULT_SMTP_SERVER.to_string()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_true() -> bool {
    true
}
