use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use allowlist_cli::{AdminCredentials, AllowlistService, Cohort, ServiceConfig, UploadOutcome};

#[derive(Parser, Debug)]
#[command(name = "upload")]
#[command(about = "Replace a cohort's source file and rebuild", long_about = None)]
pub struct Cli {
    /// Cohort: private or public
    pub cohort: Cohort,

    /// New source file
    pub file: PathBuf,

    /// Wallet address included in the signed message
    #[arg(short, long)]
    pub wallet: String,

    /// Timestamp included in the signed message
    #[arg(short, long)]
    pub timestamp: String,

    /// Admin signature, as printed by `sign`
    #[arg(short, long)]
    pub signature: String,
}

pub async fn run(cli: Cli, config: ServiceConfig) -> Result<()> {
    let contents = std::fs::read(&cli.file).context("Failed to read source file")?;
    let credentials = AdminCredentials::new(&cli.wallet, &cli.timestamp, &cli.signature);

    let service = AllowlistService::open(config).context("Failed to open allowlist service")?;
    let outcome = service
        .ingest_upload(cli.cohort, &credentials, Some(&contents))
        .await
        .context("Upload rejected")?;

    match outcome {
        UploadOutcome::Regenerated(snapshot) => {
            println!(
                "Updated {} CSV, generation {}, root {}",
                cli.cohort,
                snapshot.generation,
                allowlist_cli::hex_encode(snapshot.result(cli.cohort).merkle_root)
            );
        }
        UploadOutcome::Scheduled => println!("Updated {} CSV, regeneration queued", cli.cohort),
    }

    service.shutdown().await;
    Ok(())
}
