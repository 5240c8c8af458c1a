//! End-to-end tests of the allowlist service over a filesystem store.

use allowlist_cli::auth::{address_of, sign_admin_message};
use allowlist_cli::{
    verify_proof, AdminCredentials, AllowlistService, Cohort, ServiceConfig, Snapshot,
};
use k256::ecdsa::SigningKey;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Test Helpers
// =============================================================================

fn admin_key() -> SigningKey {
    SigningKey::from_slice(&[0x42u8; 32]).unwrap()
}

fn config_in(dir: &Path) -> ServiceConfig {
    ServiceConfig {
        private_source: dir.join("req").join("PRIVATE.csv"),
        public_source: dir.join("req").join("PUBLIC.csv"),
        data_dir: dir.join("data"),
        admins: vec![address_of(admin_key().verifying_key()).to_string()],
        ..ServiceConfig::default()
    }
}

fn address(i: u32) -> String {
    format!("0x{:040x}", 0x1000 + i)
}

fn csv(label: &str, range: std::ops::Range<u32>, limit: u128) -> String {
    let mut body = String::from("name,address,status,limit\n");
    for i in range {
        body.push_str(&format!("User {i},{},{label},{}\n", address(i), limit + u128::from(i)));
    }
    body
}

fn credentials(timestamp: &str) -> AdminCredentials {
    let wallet = address_of(admin_key().verifying_key()).to_string();
    let signature = sign_admin_message(&admin_key(), &wallet, timestamp).unwrap();
    AdminCredentials::new(&wallet, timestamp, &signature)
}

/// Every claim in both cohorts verifies against its own cohort's root, and
/// the totals add up.
fn assert_consistent(snapshot: &Snapshot) {
    for cohort in [Cohort::Private, Cohort::Public] {
        let result = snapshot.result(cohort);
        let mut total = 0u128;
        for (address, claim) in &result.claims {
            assert!(
                verify_proof(claim.index, address, claim.amount, &claim.proof, &result.merkle_root),
                "{cohort} claim for {address} does not verify"
            );
            total += claim.amount;
        }
        assert_eq!(total, result.token_total);
        assert_eq!(result.claims.len(), snapshot.balances(cohort).len());
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_regenerations_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(dir.path().join("req")).unwrap();
    std::fs::write(&config.private_source, csv("Private", 0..40, 10)).unwrap();
    std::fs::write(&config.public_source, csv("Public", 40..90, 5)).unwrap();

    let service = Arc::new(AllowlistService::open(config.clone()).unwrap());

    let mut writers = Vec::new();
    for _ in 0..16 {
        let service = Arc::clone(&service);
        writers.push(tokio::spawn(async move { service.regenerate().await }));
    }
    // readers racing the writer only ever see committed snapshots
    let mut readers = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        readers.push(tokio::spawn(async move {
            for _ in 0..20 {
                if let Some(snapshot) = service.snapshot() {
                    assert_consistent(&snapshot);
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut generations = Vec::new();
    for writer in writers {
        let snapshot = writer.await.unwrap().unwrap();
        assert_consistent(&snapshot);
        generations.push(snapshot.generation);
    }
    for reader in readers {
        reader.await.unwrap();
    }

    // coalescing never runs more builds than requests
    let last = service.snapshot().unwrap();
    assert!(last.generation >= 1 && last.generation <= 16);
    assert!(generations.iter().all(|g| *g <= last.generation));
    assert_consistent(&last);

    // the persisted blob matches the published snapshot
    let persisted = allowlist_cli::store::load_snapshot(&allowlist_cli::FsBlobStore::new(
        config.data_dir.clone(),
    ))
    .unwrap()
    .unwrap();
    assert_eq!(&persisted, last.as_ref());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_end_with_last_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let service = Arc::new(AllowlistService::open(config).unwrap());

    let private = csv("Private", 0..20, 1);
    let public = csv("Public", 20..30, 2);

    let a = {
        let service = Arc::clone(&service);
        let body = private.clone();
        tokio::spawn(async move {
            service
                .ingest_upload(Cohort::Private, &credentials("1"), Some(body.as_bytes()))
                .await
        })
    };
    let b = {
        let service = Arc::clone(&service);
        let body = public.clone();
        tokio::spawn(async move {
            service
                .ingest_upload(Cohort::Public, &credentials("2"), Some(body.as_bytes()))
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // both uploads finished, so the latest snapshot reflects both files
    let snapshot = service.snapshot().unwrap();
    assert_eq!(snapshot.private_result.claims.len(), 20);
    assert_eq!(snapshot.public_result.claims.len(), 10);
    assert_consistent(&snapshot);

    let entry = service.name(&address(25)).unwrap();
    assert_eq!(entry.status, Cohort::Public);
    assert_eq!(entry.name, "User 25");
    assert_eq!(entry.mint_limit, 27);
}

#[tokio::test]
async fn test_rebuild_is_deterministic_across_services() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(dir.path().join("req")).unwrap();
    std::fs::write(&config.private_source, csv("Private", 0..7, 3)).unwrap();
    std::fs::write(&config.public_source, csv("Public", 7..8, 3)).unwrap();

    let first = AllowlistService::open(config.clone()).unwrap();
    let a = first.regenerate().await.unwrap();
    first.shutdown().await;

    let other_dir = tempfile::tempdir().unwrap();
    let second = AllowlistService::open(ServiceConfig {
        data_dir: other_dir.path().to_path_buf(),
        ..config
    })
    .unwrap();
    let b = second.regenerate().await.unwrap();

    assert_eq!(a.private_result, b.private_result);
    assert_eq!(a.public_result, b.public_result);
    // a single public leaf is its own root
    assert!(b.public_result.claims.values().all(|c| c.proof.is_empty()));
}
