use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use allowlist_cli::ServiceConfig;

/// Options shared by every subcommand. Flags override the config file,
/// which overrides the built-in defaults.
#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// JSON config file
    #[arg(long, global = true, env = "ALLOWLIST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the committed snapshot
    #[arg(long, global = true, env = "ALLOWLIST_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Private cohort source file
    #[arg(long, global = true, env = "ALLOWLIST_PRIVATE_SOURCE")]
    pub private_source: Option<PathBuf>,

    /// Public cohort source file
    #[arg(long, global = true, env = "ALLOWLIST_PUBLIC_SOURCE")]
    pub public_source: Option<PathBuf>,

    /// Admin address (repeatable, or comma separated)
    #[arg(long = "admin", global = true, env = "ALLOWLIST_ADMINS", value_delimiter = ',')]
    pub admins: Vec<String>,

    /// Reject admin signatures whose timestamp is further than this from now
    #[arg(long, global = true, env = "ALLOWLIST_MAX_SIGNATURE_AGE")]
    pub max_signature_age_secs: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

impl GlobalOpts {
    pub fn load_config(&self) -> Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => ServiceConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(path) = &self.private_source {
            config.private_source = path.clone();
        }
        if let Some(path) = &self.public_source {
            config.public_source = path.clone();
        }
        if !self.admins.is_empty() {
            config.admins = self.admins.clone();
        }
        if self.max_signature_age_secs.is_some() {
            config.max_signature_age_secs = self.max_signature_age_secs;
        }

        Ok(config)
    }
}

/// Logs go to stderr so command output on stdout stays machine readable.
/// `RUST_LOG` takes precedence over `-v`.
pub fn setup_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
