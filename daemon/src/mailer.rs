/// Alert email delivery over SMTP via `lettre`.
///
/// One message per alert: plain-text body plus at most one attachment, sent over a
/// STARTTLS-upgraded, authenticated session.  Calls block; they run on the sensor
/// thread that raised the event.
use std::path::Path;

use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::config::AlertConfig;
use crate::error::TransportError;

/// Sends a single alert message.  Implemented by [`SmtpMailer`] and by test fakes.
pub trait Mailer: Send + Sync {
    fn send(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), TransportError>;
}

pub const TEST_SUBJECT: &str = "MIRAGE-X Test Alert";
pub const TEST_BODY: &str = "This is a test alert from your MIRAGE-X intrusion detection system.";

/// Sends one attachment-free message to check the SMTP settings (`--test-email`).
pub fn send_test_alert(mailer: &dyn Mailer) -> Result<(), TransportError> {
    mailer.send(TEST_SUBJECT, TEST_BODY, None)
}

/// MIME type for an attachment, from its file extension.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Builds the alert message.  A missing attachment file is silently left out;
/// the dispatcher is responsible for warning about it.
pub fn build_message(
    from: &Mailbox,
    to: &Mailbox,
    subject: &str,
    body: &str,
    attachment: Option<&Path>,
) -> Result<Message, TransportError> {
    let builder = Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(subject);

    let message = match attachment.filter(|p| p.is_file()) {
        Some(path) => {
            let data = std::fs::read(path).map_err(|source| TransportError::Attachment {
                path: path.to_path_buf(),
                source,
            })?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_string());
            let content_type = ContentType::parse(mime_type_for(path))
                .map_err(|e| TransportError::Message(e.to_string()))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body.to_string()))
                    .singlepart(Attachment::new(filename).body(data, content_type)),
            )
        }
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string()),
    };
    message.map_err(|e| TransportError::Message(e.to_string()))
}

/// Sends alerts through an SMTP relay using STARTTLS and the sender's credential.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &AlertConfig) -> Result<Self, TransportError> {
        let from: Mailbox = config
            .sender
            .parse()
            .map_err(|e: lettre::address::AddressError| TransportError::Message(e.to_string()))?;
        let to: Mailbox = config
            .recipient
            .parse()
            .map_err(|e: lettre::address::AddressError| TransportError::Message(e.to_string()))?;

        let transport = SmtpTransport::starttls_relay(&config.smtp_host)
            .map_err(|e| TransportError::Smtp(e.to_string()))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender.clone(),
                config.credential.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from,
            to,
        })
    }
}

impl Mailer for SmtpMailer {
    fn send(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), TransportError> {
        let message = build_message(&self.from, &self.to, subject, body, attachment)?;
        self.transport
            .send(&message)
            .map_err(|e| TransportError::Smtp(e.to_string()))?;
        info!("[email] Alert sent to {}", self.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::dispatch::tests::RecordingMailer;

    fn mailbox(s: &str) -> Mailbox {
        s.parse().unwrap()
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    fn alert_config() -> AlertConfig {
        AlertConfig {
            email_enabled: true,
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            sender: "alerts@example.com".to_string(),
            recipient: "owner@example.com".to_string(),
            credential: "app-password".to_string(),
            motion_alerts_enabled: true,
            audio_alerts_enabled: true,
        }
    }

    // ── send_test_alert ───────────────────────────────────────────────────────

    #[test]
    fn test_alert_is_plain_and_has_no_attachment() {
        let mailer = RecordingMailer::default();
        send_test_alert(&mailer).unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "MIRAGE-X Test Alert");
        assert_eq!(
            sent[0].body,
            "This is a test alert from your MIRAGE-X intrusion detection system."
        );
        assert!(sent[0].attachment.is_none());
    }

    #[test]
    fn test_alert_reports_transport_failure() {
        let mailer = RecordingMailer {
            fail: true,
            ..Default::default()
        };
        let err = send_test_alert(&mailer).unwrap_err();
        assert!(err.to_string().contains("535"));
    }

    // ── mime_type_for ─────────────────────────────────────────────────────────

    #[test]
    fn jpg_is_image() {
        assert_eq!(mime_type_for(Path::new("snapshots/a.jpg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("A.JPEG")), "image/jpeg");
    }

    #[test]
    fn wav_is_audio() {
        assert_eq!(mime_type_for(Path::new("audio_clips/a.wav")), "audio/wav");
    }

    #[test]
    fn anything_else_is_octet_stream() {
        for p in ["notes.txt", "clip.mp4", "no_extension", "archive.tar.gz"] {
            assert_eq!(mime_type_for(Path::new(p)), "application/octet-stream", "{p}");
        }
    }

    // ── build_message ─────────────────────────────────────────────────────────

    #[test]
    fn message_without_attachment_is_plain_text() {
        let msg = build_message(
            &mailbox("alerts@example.com"),
            &mailbox("owner@example.com"),
            "MIRAGE-X Alert: Motion Detected",
            "Motion detected by MIRAGE-X.",
            None,
        )
        .unwrap();
        let raw = formatted(&msg);
        assert!(raw.contains("Subject: MIRAGE-X Alert: Motion Detected"));
        assert!(raw.contains("From: alerts@example.com"));
        assert!(raw.contains("To: owner@example.com"));
        assert!(raw.contains("text/plain"));
        assert!(!raw.contains("multipart/mixed"));
    }

    #[test]
    fn message_with_snapshot_attaches_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("2024-03-09_07-05-01.jpg");
        std::fs::write(&snap, [0xFFu8, 0xD8, 0xFF, 0xE0]).unwrap();

        let msg = build_message(
            &mailbox("alerts@example.com"),
            &mailbox("owner@example.com"),
            "s",
            "b",
            Some(&snap),
        )
        .unwrap();
        let raw = formatted(&msg);
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("image/jpeg"));
        assert!(raw.contains("2024-03-09_07-05-01.jpg"));
    }

    #[test]
    fn message_with_clip_attaches_wav() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.wav");
        std::fs::write(&clip, b"RIFF....WAVE").unwrap();

        let msg = build_message(
            &mailbox("alerts@example.com"),
            &mailbox("owner@example.com"),
            "s",
            "b",
            Some(&clip),
        )
        .unwrap();
        assert!(formatted(&msg).contains("audio/wav"));
    }

    #[test]
    fn missing_attachment_falls_back_to_plain_message() {
        let missing = PathBuf::from("/definitely/not/here.jpg");
        let msg = build_message(
            &mailbox("alerts@example.com"),
            &mailbox("owner@example.com"),
            "s",
            "b",
            Some(&missing),
        )
        .unwrap();
        let raw = formatted(&msg);
        assert!(!raw.contains("multipart/mixed"));
        assert!(!raw.contains("image/jpeg"));
    }

    // ── SmtpMailer ────────────────────────────────────────────────────────────

    #[test]
    fn from_config_accepts_valid_addresses() {
        assert!(SmtpMailer::from_config(&alert_config()).is_ok());
    }

    #[test]
    fn from_config_rejects_bad_sender() {
        let mut cfg = alert_config();
        cfg.sender = "not-an-email".to_string();
        assert!(matches!(
            SmtpMailer::from_config(&cfg),
            Err(TransportError::Message(_))
        ));
    }

    #[test]
    fn send_to_unreachable_relay_is_a_transport_error() {
        let mut cfg = alert_config();
        // Nothing listens on port 1, so the connection is refused immediately.
        cfg.smtp_host = "localhost".to_string();
        cfg.smtp_port = 1;
        let mailer = SmtpMailer::from_config(&cfg).unwrap();
        let err = mailer.send("s", "b", None).unwrap_err();
        assert!(matches!(err, TransportError::Smtp(_)), "got {err}");
    }
}
