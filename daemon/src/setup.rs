/// First-run prompts for email alerts and the runtime SMTP credential.
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use lettre::message::Mailbox;
use tracing::info;

use crate::config::{Config, EmailAlertsConfig};

pub const PASSWORD_ENV: &str = "MIRAGE_SMTP_PASSWORD";

const PREFIX: &str = "[MIRAGE-X Setup]";

/// Whether the setup prompts should run before loading the config.
pub fn should_run(forced: bool, config_path: &Path) -> bool {
    forced || (!config_path.exists() && io::stdin().is_terminal())
}

/// Asks the setup questions on the terminal and writes the answers to `config_path`.
pub fn run_interactive(config_path: &Path) -> Result<Config> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let email_alerts = ask_email_alerts(&mut stdin.lock(), &mut stdout)?;
    let config = Config { email_alerts };
    config.save(config_path)?;
    info!("[setup] Wrote {}", config_path.display());
    Ok(config)
}

/// The question sequence, over any reader and writer.  Yes/no questions default to yes;
/// only an explicit "n" declines.
pub fn ask_email_alerts<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<EmailAlertsConfig> {
    let mut email = EmailAlertsConfig::default();

    if !ask_yes_no(input, output, "Do you want to enable email alerts?")? {
        return Ok(email);
    }

    let address = loop {
        let answer = ask(input, output, "Enter your Gmail address to receive alerts:")?
            .context("no email address entered")?;
        if answer.parse::<Mailbox>().is_ok() {
            break answer;
        }
        writeln!(output, "{PREFIX} `{answer}` is not a valid email address.")?;
    };

    email.enabled = true;
    email.sender_email = address.clone();
    email.receiver_email = address;
    email.on_motion = ask_yes_no(input, output, "Enable motion alerts via email?")?;
    email.on_audio = ask_yes_no(input, output, "Enable audio alerts via email?")?;
    Ok(email)
}

fn ask_yes_no<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<bool> {
    let answer = ask(input, output, &format!("{question} (Y/n):"))?;
    Ok(!matches!(answer.as_deref().map(str::to_lowercase).as_deref(), Some("n" | "no")))
}

/// Prints the question and reads one trimmed line; `None` at end of input.
fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<Option<String>> {
    write!(output, "{PREFIX} {question} ")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// SMTP password for `sender`: taken from `MIRAGE_SMTP_PASSWORD` if set, otherwise
/// asked for on the terminal without echo.  Never stored.
pub fn smtp_credential(sender: &str) -> Result<String> {
    credential_from(std::env::var(PASSWORD_ENV).ok(), || {
        if !io::stdin().is_terminal() {
            bail!("email alerts are enabled but {PASSWORD_ENV} is not set and no terminal is attached");
        }
        rpassword::prompt_password(format!("{PREFIX} Enter the app password for {sender}: "))
            .context("failed to read SMTP password")
    })
}

fn credential_from(env: Option<String>, prompt: impl FnOnce() -> Result<String>) -> Result<String> {
    let credential = match env {
        Some(value) if !value.is_empty() => value,
        _ => prompt()?,
    };
    if credential.is_empty() {
        bail!("an SMTP password is required when email alerts are enabled");
    }
    Ok(credential)
}
