pub mod address;
pub mod api;
pub mod auth;
pub mod balance;
pub mod common;
pub mod config;
pub mod error;
pub mod leaf;
pub mod service;
pub mod store;
pub mod tree;
mod worker;

pub use address::Address;
pub use auth::{AdminAuthorizer, AdminCredentials, AdminSet};
pub use balance::{Assembler, BalanceMap, BalanceMaps, Cohort, IngestReport, NameEntry};
pub use common::{hex_encode, keccak256, parse_hash, write_file_atomic, Hash};
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use leaf::encode_leaf;
pub use service::{AllowlistService, Roots, UploadOutcome};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, Snapshot};
pub use tree::{verify_proof, MerkleProof, MerkleResult, MerkleTree, EMPTY_ROOT};
