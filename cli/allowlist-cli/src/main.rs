#![forbid(unsafe_code)]
#![allow(unreachable_pub)]

use clap::{Parser, Subcommand};

mod cli;
mod query;
mod regenerate;
mod sign;
mod upload;
mod verify;

#[derive(Parser, Debug)]
#[command(name = "allowlist")]
#[command(about = "Merkle allowlist builder and admin tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    opts: cli::GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Regenerate(regenerate::Cli),
    Roots(query::RootsCli),
    Name(query::NameCli),
    Proof(query::ProofCli),
    Verify(verify::Cli),
    Upload(upload::Cli),
    Sign(sign::Cli),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli::setup_tracing(cli.opts.verbose);

    let opts = cli.opts;
    match cli.command {
        Commands::Regenerate(args) => regenerate::run(args, opts.load_config()?).await?,
        Commands::Roots(args) => query::roots(args, opts.load_config()?).await?,
        Commands::Name(args) => query::name(args, opts.load_config()?).await?,
        Commands::Proof(args) => query::proof(args, opts.load_config()?).await?,
        Commands::Verify(args) => verify::run(&args)?,
        Commands::Upload(args) => upload::run(args, opts.load_config()?).await?,
        Commands::Sign(args) => sign::run(args)?,
    }

    Ok(())
}
