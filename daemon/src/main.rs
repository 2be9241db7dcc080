mod artifact;
mod audio;
mod audio_capture;
mod cancel;
mod capture;
mod cli;
mod config;
mod cooldown;
mod dispatch;
mod error;
mod event;
mod lifecycle;
mod mailer;
mod motion;
mod paths;
mod preview;
mod setup;
mod speech;

use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::artifact::{cleanup_older_than, ArtifactStore};
use crate::audio::AudioSettings;
use crate::cli::Cli;
use crate::config::AlertConfig;
use crate::dispatch::Dispatcher;
use crate::lifecycle::{AudioLaunch, Lifecycle, MotionLaunch, PreviewOpener};
use crate::mailer::{send_test_alert, Mailer, SmtpMailer};
use crate::motion::{MotionSettings, POLL_INTERVAL};
use crate::paths::DataPaths;

#[tokio::main]
async fn main() {
    // ── Logging ───────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let paths = DataPaths::new(&cli.data_dir);

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let loaded = if setup::should_run(cli.setup, &config_path) {
        setup::run_interactive(&config_path)
    } else {
        config::load_or_default(&config_path)
    };
    let config = loaded.unwrap_or_else(|e| {
        error!("[config] {e:#}");
        std::process::exit(1);
    });

    // ── Alerts ────────────────────────────────────────────────────────────────
    let credential = if config.email_alerts.enabled {
        setup::smtp_credential(&config.email_alerts.sender_email).unwrap_or_else(|e| {
            error!("[email] {e:#}");
            std::process::exit(1);
        })
    } else {
        String::new()
    };
    let alert_config = Arc::new(AlertConfig::from_config(&config, credential));

    let mailer: Option<Box<dyn Mailer>> = if alert_config.email_enabled {
        match SmtpMailer::from_config(&alert_config) {
            Ok(m) => Some(Box::new(m)),
            Err(e) => {
                error!("[email] {e}");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    if cli.test_email {
        let Some(mailer) = mailer.as_deref() else {
            error!("[email] Email alerts are disabled in {}; run with --setup first", config_path.display());
            std::process::exit(1);
        };
        match send_test_alert(mailer) {
            Ok(()) => {
                info!("[email] Test email sent to {}", alert_config.recipient);
                return;
            }
            Err(e) => {
                error!("[email] Test email failed: {e}");
                std::process::exit(1);
            }
        }
    }

    let mut dispatcher = Dispatcher::new(
        Arc::clone(&alert_config),
        cli.log.then(|| paths.log_file()),
        mailer,
    );
    if cli.speak {
        match speech::open_voice() {
            Ok(voice) => dispatcher = dispatcher.with_voice(voice),
            Err(e) => warn!("[speech] {e}; alerts will not be spoken"),
        }
    }
    let dispatcher = Arc::new(dispatcher);

    // ── Cleanup ───────────────────────────────────────────────────────────────
    if let Some(days) = cli.cleanup_days {
        for dir in [paths.snapshots_dir(), paths.audio_clips_dir()] {
            if let Err(e) = cleanup_older_than(&dir, days) {
                warn!("[cleanup] Cannot read {}: {e}", dir.display());
            }
        }
    }

    // ── Sensors ───────────────────────────────────────────────────────────────
    let store = ArtifactStore::new(paths.snapshots_dir(), paths.audio_clips_dir());

    let motion = (!cli.no_video).then(|| {
        let index = cli.camera;
        MotionLaunch {
            open: Box::new(move || capture::open_camera(index)),
            settings: MotionSettings {
                cooldown: cli.cooldown(),
                gamma: cli.gamma,
                poll_interval: POLL_INTERVAL,
                show_status: !cli.headless,
            },
            snapshots: cli.save_snaps.then(|| store.clone()),
            preview: (!cli.headless).then(|| Box::new(preview::open_preview) as PreviewOpener),
        }
    });

    let audio = (!cli.no_audio).then(|| AudioLaunch {
        open: Box::new(audio_capture::open_microphone),
        settings: AudioSettings {
            cooldown: cli.cooldown(),
            threshold: cli.threshold,
            clip_extra: cli.clip_extra(),
            show_status: !cli.headless,
        },
        clips: cli.save_audio.then(|| store.clone()),
    });

    info!(
        "MIRAGE-X v{} started (data dir {}, email alerts {})",
        env!("CARGO_PKG_VERSION"),
        paths.root().display(),
        if alert_config.email_enabled { "on" } else { "off" }
    );

    // ── Run until stopped ─────────────────────────────────────────────────────
    let lifecycle = Lifecycle::new();
    tokio::spawn(lifecycle.clone().watch_signals());
    lifecycle.run(dispatcher, motion, audio).await;
    debug!("[lifecycle] Final state {:?}", lifecycle.state());

    info!("Shutting down.");
}
