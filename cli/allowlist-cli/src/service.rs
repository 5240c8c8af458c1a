//! The allowlist service: regeneration plus read-only queries.
//!
//! Reads are answered from the last committed [`Snapshot`] and never wait on
//! a regeneration in progress. Regeneration is serialized through a single
//! worker; see [`crate::worker`] for how concurrent requests are coalesced.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tracing::{info, info_span};

use crate::address::Address;
use crate::auth::{AdminAuthorizer, AdminCredentials};
use crate::balance::{Assembler, Cohort, NameEntry};
use crate::common::{hash_hex, hex_encode, write_file_atomic, Hash};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::store::{commit_snapshot, load_snapshot, BlobStore, FsBlobStore, Snapshot};
use crate::tree::{MerkleProof, MerkleTree};
use crate::worker::{Handle, WorkerLoop};

/// Current roots of both cohorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roots {
    #[serde(with = "hash_hex")]
    pub private_root: Hash,
    #[serde(with = "hash_hex")]
    pub public_root: Hash,
}

/// What happened after an accepted upload.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// The triggered regeneration finished and committed this snapshot.
    Regenerated(Arc<Snapshot>),
    /// The regeneration was queued without waiting for it.
    Scheduled,
}

/// Reads both sources, builds both trees and commits the result.
///
/// Nothing is written unless every step succeeds, so a failure leaves the
/// previously committed snapshot in place.
pub fn regenerate_snapshot(
    config: &ServiceConfig,
    store: &dyn BlobStore,
    generation: u64,
) -> Result<Snapshot> {
    let _span = info_span!("regenerate", generation).entered();

    let mut assembler = Assembler::new();
    for (cohort, path) in config.sources() {
        let source = path.display().to_string();
        match File::open(path) {
            Ok(file) => {
                info!(%cohort, source = %source, "ingesting allowlist source");
                assembler.ingest(&source, BufReader::new(file));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => assembler.mark_missing(&source),
            Err(e) => return Err(Error::storage(&source, e)),
        }
    }
    let (maps, report) = assembler.finish();

    let private_result = MerkleTree::build(&maps.private)?.to_result()?;
    let public_result = MerkleTree::build(&maps.public)?.to_result()?;

    let snapshot = Snapshot::new(generation, maps, private_result, public_result, report);
    commit_snapshot(store, &snapshot)?;

    info!(
        private_root = %hex_encode(snapshot.private_result.merkle_root),
        private_claims = snapshot.private_result.claims.len(),
        public_root = %hex_encode(snapshot.public_result.merkle_root),
        public_claims = snapshot.public_result.claims.len(),
        accepted = snapshot.report.accepted,
        skipped = snapshot.report.skipped(),
        overrides = snapshot.report.overrides,
        "committed allowlist snapshot"
    );
    Ok(snapshot)
}

pub struct AllowlistService {
    config: Arc<ServiceConfig>,
    authorizer: AdminAuthorizer,
    worker: Handle,
}

impl AllowlistService {
    /// Opens the service over a filesystem store at `config.data_dir`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(config: ServiceConfig) -> Result<Self> {
        let store = Arc::new(FsBlobStore::new(config.data_dir.clone()));
        Self::with_store(config, store)
    }

    /// Opens the service over any store, resuming from its last snapshot.
    pub fn with_store(config: ServiceConfig, store: Arc<dyn BlobStore>) -> Result<Self> {
        let authorizer = config.authorizer()?;
        let initial = load_snapshot(store.as_ref())?;
        if let Some(snapshot) = &initial {
            info!(generation = snapshot.generation, "resuming from committed snapshot");
        }

        let config = Arc::new(config);
        let worker = WorkerLoop::spawn(Arc::clone(&config), store, initial);

        Ok(Self {
            config,
            authorizer,
            worker,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn authorizer(&self) -> &AdminAuthorizer {
        &self.authorizer
    }

    /// Last committed snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.worker.current()
    }

    fn committed(&self) -> Result<Arc<Snapshot>> {
        self.snapshot()
            .ok_or_else(|| Error::not_found("no committed snapshot"))
    }

    /// Rebuilds both cohorts from the current source files.
    pub async fn regenerate(&self) -> Result<Arc<Snapshot>> {
        self.worker.regenerate().await
    }

    /// Rebuilds after checking admin credentials.
    pub async fn regenerate_authorized(&self, credentials: &AdminCredentials) -> Result<Arc<Snapshot>> {
        let admin = self.authorizer.authorize(credentials)?;
        info!(%admin, "regeneration requested");
        self.regenerate().await
    }

    pub fn roots(&self) -> Result<Roots> {
        let snapshot = self.committed()?;
        Ok(Roots {
            private_root: snapshot.private_result.merkle_root,
            public_root: snapshot.public_result.merkle_root,
        })
    }

    pub fn name(&self, address: &str) -> Result<NameEntry> {
        let address = Address::normalize(address)?;
        self.committed()?
            .names
            .get(&address)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{address} has no entry")))
    }

    pub fn proof(&self, cohort: Cohort, address: &str) -> Result<MerkleProof> {
        let address = Address::normalize(address)?;
        self.committed()?
            .result(cohort)
            .claims
            .get(&address)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{address} is not in the {cohort} list")))
    }

    /// Replaces one cohort's source file and rebuilds.
    ///
    /// Credentials are checked before anything is written.
    pub async fn ingest_upload(
        &self,
        cohort: Cohort,
        credentials: &AdminCredentials,
        file: Option<&[u8]>,
    ) -> Result<UploadOutcome> {
        let admin = self.authorizer.authorize(credentials)?;
        let contents = file.filter(|bytes| !bytes.is_empty()).ok_or(Error::MissingFile)?;

        let path = self.config.source_path(cohort);
        write_file_atomic(path, contents).map_err(|e| Error::storage(&path.display().to_string(), e))?;
        info!(%admin, %cohort, bytes = contents.len(), "replaced allowlist source");

        if self.config.await_regeneration {
            Ok(UploadOutcome::Regenerated(self.regenerate().await?))
        } else {
            drop(self.worker.request()?);
            Ok(UploadOutcome::Scheduled)
        }
    }

    /// Stops the worker after any queued regeneration completes.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }
}
