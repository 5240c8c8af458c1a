use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{AdminAuthorizer, AdminSet};
use crate::balance::Cohort;
use crate::error::{Error, Result};

/// Admins of the original deployment: two operators and the developer key.
pub const DEFAULT_ADMINS: [&str; 3] = [
    "0xB0c445C292C2E33388118Bef6FE2AD9D313f90ec",
    "0x79A16789FC811DbD21C5fD6c96BA93c7c709f7d0",
    "0xBf8fF255aD1f369929715a3290d1ef71d79f8954",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Source file for the private cohort, ingested first.
    pub private_source: PathBuf,
    /// Source file for the public cohort, ingested second.
    pub public_source: PathBuf,
    /// Directory holding the committed snapshot.
    pub data_dir: PathBuf,
    pub admins: Vec<String>,
    /// Accepted distance between a signed timestamp and now. Unset disables
    /// the check.
    pub max_signature_age_secs: Option<u64>,
    /// Whether an upload waits for the regeneration it triggers.
    pub await_regeneration: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            private_source: PathBuf::from("req/PRIVATE.csv"),
            public_source: PathBuf::from("req/PUBLIC.csv"),
            data_dir: PathBuf::from("data"),
            admins: DEFAULT_ADMINS.iter().map(|a| a.to_string()).collect(),
            max_signature_age_secs: None,
            await_regeneration: true,
        }
    }
}

impl ServiceConfig {
    /// Reads a JSON config file; absent fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::storage(&path.display().to_string(), e))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::storage("parse config", e))
    }

    pub fn source_path(&self, cohort: Cohort) -> &Path {
        match cohort {
            Cohort::Private => &self.private_source,
            Cohort::Public => &self.public_source,
        }
    }

    /// Sources in ingestion order; later sources override earlier rows.
    pub fn sources(&self) -> [(Cohort, &Path); 2] {
        [
            (Cohort::Private, self.private_source.as_path()),
            (Cohort::Public, self.public_source.as_path()),
        ]
    }

    pub fn authorizer(&self) -> Result<AdminAuthorizer> {
        let admins = AdminSet::parse(&self.admins)?;
        Ok(AdminAuthorizer::new(admins)
            .with_max_age(self.max_signature_age_secs.map(Duration::from_secs)))
    }
}
