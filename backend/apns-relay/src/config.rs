use anyhow::{bail, Context, Result};
use apns_legacy::{ApnsConfig, Message};

#[derive(Debug, Clone)]
pub struct Settings {
    pub apns: ApnsConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let apns = ApnsConfig::from_env().context("invalid APNs configuration")?;
        Ok(Self { apns })
    }
}

/// `LOG_FORMAT=json` switches logs to JSON lines
pub fn log_json_requested() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// What the relay was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Send one notification
    Send {
        device_token: String,
        message: Message,
    },
    /// Drain the feedback service and print each record as a JSON line
    Feedback,
}

pub const USAGE: &str = "usage: apns-relay send <device-token> <alert> [badge] | apns-relay feedback";

impl Command {
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();

        match args.next().as_deref() {
            Some("send") => {
                let device_token = args.next().context(USAGE)?;
                let alert = args.next().context(USAGE)?;
                let mut message = Message::alert(alert);

                if let Some(badge) = args.next() {
                    let badge = badge
                        .parse::<u32>()
                        .with_context(|| format!("badge must be a number, got {badge:?}"))?;
                    message = message.with_badge(badge);
                }

                Ok(Command::Send {
                    device_token,
                    message,
                })
            }
            Some("feedback") => Ok(Command::Feedback),
            _ => bail!(USAGE),
        }
    }
}
