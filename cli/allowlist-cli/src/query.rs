use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use allowlist_cli::{AllowlistService, Cohort, ServiceConfig};

#[derive(Parser, Debug)]
#[command(name = "roots")]
#[command(about = "Print the committed roots of both cohorts", long_about = None)]
pub struct RootsCli {}

#[derive(Parser, Debug)]
#[command(name = "name")]
#[command(about = "Print the name, cohort and mint limit of an address", long_about = None)]
pub struct NameCli {
    /// Address to look up
    pub address: String,
}

#[derive(Parser, Debug)]
#[command(name = "proof")]
#[command(about = "Print the Merkle proof of an address", long_about = None)]
pub struct ProofCli {
    /// Cohort: private or public
    pub cohort: Cohort,

    /// Address to look up
    pub address: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

pub async fn roots(_cli: RootsCli, config: ServiceConfig) -> Result<()> {
    let service = AllowlistService::open(config).context("Failed to open allowlist service")?;
    let roots = service.roots().context("No roots committed yet")?;
    print_json(&roots)?;
    service.shutdown().await;
    Ok(())
}

pub async fn name(cli: NameCli, config: ServiceConfig) -> Result<()> {
    let service = AllowlistService::open(config).context("Failed to open allowlist service")?;
    let entry = service
        .name(&cli.address)
        .with_context(|| format!("No entry for {}", cli.address))?;
    print_json(&entry)?;
    service.shutdown().await;
    Ok(())
}

pub async fn proof(cli: ProofCli, config: ServiceConfig) -> Result<()> {
    let service = AllowlistService::open(config).context("Failed to open allowlist service")?;
    let proof = service
        .proof(cli.cohort, &cli.address)
        .with_context(|| format!("No {} proof for {}", cli.cohort, cli.address))?;
    print_json(&proof)?;
    service.shutdown().await;
    Ok(())
}
