/// APNs Relay Entry Point
///
/// Sends a single notification through the binary gateway, or drains the
/// feedback service and prints each expired token as a JSON line.
///
/// Configuration comes from the environment (and `.env`), see
/// `ApnsConfig::from_env` for the variables.
mod config;

use anyhow::Result;
use apns_legacy::ApnsClient;
use tracing::info;

use crate::config::{log_json_requested, Command, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(log_json_requested());

    let settings = Settings::from_env()?;

    let command = Command::parse(std::env::args().skip(1))?;
    let client = ApnsClient::new(settings.apns);

    match command {
        Command::Send {
            device_token,
            message,
        } => {
            client.send_notification(&device_token, message).await?;
            info!("Notification handed to the gateway");
        }
        Command::Feedback => {
            for record in client.feedback().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "apns_relay=info,apns_legacy=info".into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
