use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use allowlist_cli::balance::RowFault;
use allowlist_cli::{hex_encode, AllowlistService, ServiceConfig};

#[derive(Parser, Debug)]
#[command(name = "regenerate")]
#[command(about = "Rebuild both Merkle trees from the source files", long_about = None)]
pub struct Cli {
    /// Include every skipped row in the output
    #[arg(long)]
    pub show_faults: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegenerateOutput {
    generation: u64,
    private_root: String,
    private_token_total: String,
    private_claims: usize,
    public_root: String,
    public_token_total: String,
    public_claims: usize,
    accepted: usize,
    skipped: usize,
    overrides: usize,
    missing_sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    faults: Option<Vec<RowFault>>,
}

pub async fn run(cli: Cli, config: ServiceConfig) -> Result<()> {
    let service = AllowlistService::open(config).context("Failed to open allowlist service")?;
    let snapshot = service.regenerate().await.context("Regeneration failed")?;

    let report = &snapshot.report;
    let output = RegenerateOutput {
        generation: snapshot.generation,
        private_root: hex_encode(snapshot.private_result.merkle_root),
        private_token_total: snapshot.private_result.token_total.to_string(),
        private_claims: snapshot.private_result.claims.len(),
        public_root: hex_encode(snapshot.public_result.merkle_root),
        public_token_total: snapshot.public_result.token_total.to_string(),
        public_claims: snapshot.public_result.claims.len(),
        accepted: report.accepted,
        skipped: report.skipped(),
        overrides: report.overrides,
        missing_sources: report.missing_sources.clone(),
        faults: cli.show_faults.then(|| report.faults.clone()),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize output")?
    );
    service.shutdown().await;
    Ok(())
}
