use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;

use allowlist_cli::{parse_hash, verify_proof, Address, MerkleProof};

#[derive(Parser, Debug)]
#[command(name = "verify")]
#[command(about = "Check a claim proof against a Merkle root", long_about = None)]
pub struct Cli {
    /// Proof JSON as printed by `proof` (use "-" for stdin)
    #[arg(short, long)]
    pub claim: PathBuf,

    /// Claiming address
    #[arg(short, long)]
    pub address: String,

    /// Merkle root (hex format)
    #[arg(short, long)]
    pub root: String,
}

#[derive(Debug, Serialize)]
struct VerifyOutput {
    address: String,
    index: u64,
    amount: String,
    valid: bool,
}

fn read_claim(path: &PathBuf) -> Result<MerkleProof> {
    let content = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read claim from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path).context("Failed to read claim file")?
    };
    serde_json::from_str(&content).context("Failed to parse claim JSON")
}

pub fn run(cli: &Cli) -> Result<()> {
    let root = parse_hash(&cli.root).context("Invalid Merkle root")?;
    let address = Address::normalize(&cli.address).context("Invalid address")?;
    let claim = read_claim(&cli.claim)?;

    let valid = verify_proof(claim.index, &address, claim.amount, &claim.proof, &root);
    let output = VerifyOutput {
        address: address.to_string(),
        index: claim.index,
        amount: claim.amount.to_string(),
        valid,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize output")?
    );

    if !valid {
        anyhow::bail!("Proof does not match root {}", cli.root);
    }
    Ok(())
}
