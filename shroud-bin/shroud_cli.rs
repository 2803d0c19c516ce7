use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::{
    signers::LocalWallet,
    types::{Address, U256},
};
use shroud_client::{ShroudClient, ShroudConfig};
use tracing::info;
use tracing_appender::{
    non_blocking,
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    prelude::*,
    EnvFilter, Registry,
};

/// The name of the environment variable holding the signer's private key
const PRIVATE_KEY: &str = "SHROUD_PRIVATE_KEY";
/// The directory where the logs are stored.
const LOGS: &str = "./logs";
/// The log file name.
const LOG_FILE: &str = "shroud-cli.log";

/// Command line arguments for the shielded client
#[derive(Parser)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config_path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Performs a shielded read call and prints the decrypted result
    Call {
        /// Address of the contract to call
        #[arg(long)]
        to: String,

        /// ABI-encoded calldata, 0x-prefixed hex
        #[arg(long)]
        data: String,
    },
    /// Submits a shielded transaction and waits for its receipt
    Send {
        /// Address of the contract to call
        #[arg(long)]
        to: String,

        /// ABI-encoded calldata, 0x-prefixed hex
        #[arg(long)]
        data: String,

        /// Value in wei attached to the transaction
        #[arg(long, default_value_t = 0)]
        value: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = setup_logging(LOGS).context("Failed to setup logging")?;
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = ShroudConfig::from_file_path(&args.config_path);

    info!(
        target = "shroud-cli",
        event = "client_start",
        endpoint = config.endpoint(),
        "Starting shielded client"
    );
    let client = ShroudClient::from_config(config)?;

    match args.command {
        Command::Call { to, data } => {
            let to = parse_address(&to)?;
            let data = parse_hex(&data)?;
            let result = client
                .shielded_call(to, &data)
                .await
                .context("Shielded call failed")?;
            println!("0x{}", hex::encode(result));
        }
        Command::Send { to, data, value } => {
            let to = parse_address(&to)?;
            let data = parse_hex(&data)?;
            let signer: LocalWallet = std::env::var(PRIVATE_KEY)
                .with_context(|| format!("{PRIVATE_KEY} must be set for shielded sends"))?
                .parse()
                .context("Failed to parse the signer's private key")?;

            let pending = client
                .shielded_send(&signer, to, &data, U256::from(value))
                .await
                .context("Shielded send failed")?;
            println!("submitted: {:#x}", pending.tx_hash);

            let receipt = client
                .confirm(&pending)
                .await
                .context("Failed to confirm the transaction; check the printed hash")?;
            info!(
                target = "shroud-cli",
                event = "transaction_confirmed",
                tx_hash = %pending.tx_hash,
                block_number = ?receipt.block_number,
                "Shielded transaction confirmed"
            );
            println!(
                "included in block {} (status: {})",
                receipt
                    .block_number
                    .map_or_else(|| "<pending>".to_string(), |n| n.to_string()),
                receipt
                    .status
                    .map_or_else(|| "<unknown>".to_string(), |s| s.to_string()),
            );
        }
    }

    Ok(())
}

fn parse_address(text: &str) -> Result<Address> {
    text.parse()
        .with_context(|| format!("`{text}` is not a valid address"))
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(text).with_context(|| "calldata must be hex-encoded")
}

fn setup_logging<P: AsRef<Path>>(log_dir: P) -> Result<WorkerGuard> {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_writer(non_blocking_appender);

    let console_layer = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_writer(std::io::stderr);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}
