use anyhow::{Context, Result};
use clap::Parser;
use k256::ecdsa::SigningKey;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

use allowlist_cli::auth::{address_of, sign_admin_message};

#[derive(Parser, Debug)]
#[command(name = "sign")]
#[command(about = "Sign admin credentials for a privileged request", long_about = None)]
pub struct Cli {
    /// Private key (hex format, with or without 0x prefix)
    /// Alternatively, use "-" to read from stdin (more secure)
    #[arg(short = 'k', long)]
    pub private_key: String,

    /// Wallet address for the message (defaults to the signer's address)
    #[arg(short, long)]
    pub wallet: Option<String>,

    /// Timestamp for the message (defaults to now, in Unix milliseconds)
    #[arg(short, long)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignOutput {
    wallet_address: String,
    timestamp: String,
    sign_data: String,
    signer: String,
}

fn load_signing_key(arg: &str) -> Result<SigningKey> {
    let mut key_str = if arg == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_line(&mut buffer)
            .context("Failed to read private key from stdin")?;
        let trimmed = buffer.trim().to_string();
        buffer.zeroize();
        trimmed
    } else {
        arg.trim().to_string()
    };

    let cleaned = key_str.strip_prefix("0x").unwrap_or(&key_str);
    if cleaned.is_empty() {
        key_str.zeroize();
        anyhow::bail!("Private key is empty");
    }
    let decoded = hex::decode(cleaned);
    key_str.zeroize();
    let mut key_bytes = decoded.context("Invalid private key format")?;
    if key_bytes.len() != 32 {
        let len = key_bytes.len();
        key_bytes.zeroize();
        anyhow::bail!("Invalid private key length: expected 32 bytes, got {}", len);
    }

    let signing_key = SigningKey::from_slice(&key_bytes).context("Invalid private key");
    key_bytes.zeroize();
    signing_key
}

pub fn run(cli: Cli) -> Result<()> {
    let signing_key = load_signing_key(&cli.private_key)?;
    let signer = address_of(signing_key.verifying_key());

    let wallet = cli.wallet.unwrap_or_else(|| signer.to_string());
    let timestamp = match cli.timestamp {
        Some(ts) => ts,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("System clock before Unix epoch")?
            .as_millis()
            .to_string(),
    };

    let sign_data =
        sign_admin_message(&signing_key, &wallet, &timestamp).context("Failed to sign message")?;

    let output = SignOutput {
        wallet_address: wallet,
        timestamp,
        sign_data,
        signer: signer.to_string(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize output")?
    );
    Ok(())
}
