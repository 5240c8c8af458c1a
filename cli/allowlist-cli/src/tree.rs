//! Merkle tree over claim leaves.
//!
//! Leaves are placed in balance-map order, so a claim's index is its
//! position in the map. Parents hash their two children in sorted byte
//! order, which lets a verifier fold a proof without left/right flags. On a
//! level of odd length the last node is paired with itself, and its proof
//! entry for that level is its own hash.
//!
//! A tree with no leaves has the root [`EMPTY_ROOT`], `keccak256("")`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::address::Address;
use crate::balance::BalanceMap;
use crate::common::{hash_hex, hash_list_hex, keccak256_hash, Hash};
use crate::error::{Error, Result};
use crate::leaf::encode_leaf;

/// Root of a tree with no leaves.
pub const EMPTY_ROOT: Hash = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
];

/// Proof that one address holds one claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: u64,
    #[serde(with = "crate::common::decimal")]
    pub amount: u128,
    #[serde(with = "hash_list_hex")]
    pub proof: Vec<Hash>,
}

/// Published outcome of building one cohort's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleResult {
    #[serde(with = "hash_hex")]
    pub merkle_root: Hash,
    #[serde(with = "crate::common::decimal")]
    pub token_total: u128,
    pub claims: BTreeMap<Address, MerkleProof>,
}

impl MerkleResult {
    /// Result for a cohort with no entitlements.
    pub fn empty() -> Self {
        Self {
            merkle_root: EMPTY_ROOT,
            token_total: 0,
            claims: BTreeMap::new(),
        }
    }

    /// Checks the stored proof for `address` against this result's root.
    pub fn verify_claim(&self, address: &Address) -> bool {
        self.claims.get(address).is_some_and(|claim| {
            verify_proof(claim.index, address, claim.amount, &claim.proof, &self.merkle_root)
        })
    }
}

/// Hashes two nodes in sorted order.
pub fn hash_pair(a: Hash, b: Hash) -> Hash {
    if a <= b {
        keccak256_hash(a, b)
    } else {
        keccak256_hash(b, a)
    }
}

/// Builds every level of the tree bottom-up.
///
/// Returns the levels (leaves first) and the root.
pub fn build_merkle_tree(leaves: Vec<Hash>) -> (Vec<Vec<Hash>>, Hash) {
    if leaves.is_empty() {
        return (Vec::new(), EMPTY_ROOT);
    }

    let mut tree: Vec<Vec<Hash>> = vec![leaves];
    while let Some(level) = tree.last().filter(|level| level.len() > 1) {
        let next_level = level
            .chunks(2)
            .map(|chunk| {
                let left = chunk[0];
                let right = chunk.get(1).copied().unwrap_or(left);
                hash_pair(left, right)
            })
            .collect();
        tree.push(next_level);
    }

    let root = tree.last().map(|level| level[0]).unwrap_or(EMPTY_ROOT);
    (tree, root)
}

/// Collects the sibling hashes from a leaf up to (not including) the root.
///
/// # Errors
/// `NotFound` if the tree is empty or `leaf_index` is out of bounds.
pub fn get_merkle_proof(tree: &[Vec<Hash>], leaf_index: usize) -> Result<Vec<Hash>> {
    let leaf_count = tree.first().map(Vec::len).unwrap_or(0);
    if leaf_index >= leaf_count {
        return Err(Error::not_found(format!(
            "leaf index {leaf_index} in tree with {leaf_count} leaves"
        )));
    }

    let mut proof = Vec::with_capacity(tree.len().saturating_sub(1));
    let mut current_index = leaf_index;

    for level in &tree[..tree.len() - 1] {
        let sibling_index = current_index ^ 1;
        let sibling = level
            .get(sibling_index)
            .copied()
            .unwrap_or(level[current_index]);
        proof.push(sibling);
        current_index /= 2;
    }

    Ok(proof)
}

/// Recomputes the root from one claim and its proof.
pub fn verify_proof(index: u64, address: &Address, amount: u128, proof: &[Hash], root: &Hash) -> bool {
    let computed = proof
        .iter()
        .fold(encode_leaf(index, address, amount), |node, sibling| {
            hash_pair(node, *sibling)
        });
    &computed == root
}

/// A fully built claim tree for one balance map.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
    root: Hash,
    entries: Vec<(Address, u128)>,
    token_total: u128,
}

impl MerkleTree {
    /// Builds the tree from a balance map, indexing entries in map order.
    pub fn build(map: &BalanceMap) -> Result<Self> {
        Self::from_entries(map.iter().map(|(address, limit)| (*address, *limit)))
    }

    /// Builds the tree from ordered `(address, amount)` pairs.
    ///
    /// # Errors
    /// `InvalidEntitlement` on a zero or repeated address, `AmountOverflow`
    /// if the amounts do not sum within 128 bits.
    pub fn from_entries(entries: impl IntoIterator<Item = (Address, u128)>) -> Result<Self> {
        let entries: Vec<(Address, u128)> = entries.into_iter().collect();

        let mut seen = HashSet::with_capacity(entries.len());
        let mut token_total: u128 = 0;
        for (address, amount) in &entries {
            if address.is_zero() {
                return Err(Error::InvalidEntitlement("zero address in balance map".into()));
            }
            if !seen.insert(*address) {
                return Err(Error::InvalidEntitlement(format!("duplicate address {address}")));
            }
            token_total = token_total
                .checked_add(*amount)
                .ok_or_else(|| Error::AmountOverflow("token total exceeds the service limit of 2^128 - 1".into()))?;
        }

        let leaves = entries
            .iter()
            .enumerate()
            .map(|(index, (address, amount))| encode_leaf(index as u64, address, *amount))
            .collect();
        let (levels, root) = build_merkle_tree(leaves);

        Ok(Self {
            levels,
            root,
            entries,
            token_total,
        })
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn token_total(&self) -> u128 {
        self.token_total
    }

    pub fn leaf_count(&self) -> usize {
        self.entries.len()
    }

    pub fn levels(&self) -> &[Vec<Hash>] {
        &self.levels
    }

    pub fn proof(&self, leaf_index: usize) -> Result<Vec<Hash>> {
        get_merkle_proof(&self.levels, leaf_index)
    }

    /// Produces the publishable result with a proof for every claim.
    pub fn to_result(&self) -> Result<MerkleResult> {
        let mut claims = BTreeMap::new();
        for (index, (address, amount)) in self.entries.iter().enumerate() {
            claims.insert(
                *address,
                MerkleProof {
                    index: index as u64,
                    amount: *amount,
                    proof: self.proof(index)?,
                },
            );
        }

        Ok(MerkleResult {
            merkle_root: self.root,
            token_total: self.token_total,
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::keccak256;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn abc() -> Vec<(Address, u128)> {
        vec![(addr(0xa), 10), (addr(0xb), 20), (addr(0xc), 30)]
    }

    #[test]
    fn test_empty_root_is_keccak_of_nothing() {
        assert_eq!(EMPTY_ROOT, keccak256([]));
    }

    #[test]
    fn test_hash_pair_is_order_independent() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_eq!(hash_pair(a, b), hash_pair(b, a));
        assert_eq!(hash_pair(a, b), keccak256_hash(a, b));
    }

    #[test]
    fn test_build_merkle_tree_levels() {
        let leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32]];
        let (tree, root) = build_merkle_tree(leaves);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[1].len(), 2);
        assert_eq!(tree[2], vec![root]);
        assert_eq!(root, hash_pair(tree[1][0], tree[1][1]));
    }

    #[test]
    fn test_get_merkle_proof() {
        let leaves = vec![[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32]];
        let (tree, _) = build_merkle_tree(leaves);

        let proof = get_merkle_proof(&tree, 0).unwrap();
        assert_eq!(proof, vec![[2u8; 32], tree[1][1]]);
    }

    #[test]
    fn test_get_merkle_proof_empty_tree() {
        let tree: Vec<Vec<Hash>> = vec![];
        assert!(matches!(get_merkle_proof(&tree, 0), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_get_merkle_proof_out_of_bounds() {
        let (tree, _) = build_merkle_tree(vec![[1u8; 32], [2u8; 32]]);
        assert!(get_merkle_proof(&tree, 5).is_err());
    }

    #[test]
    fn test_odd_level_duplicates_last_node() {
        let tree = MerkleTree::from_entries(abc()).unwrap();
        let leaf_c = encode_leaf(2, &addr(0xc), 30);

        let levels = tree.levels();
        assert_eq!(levels[0][2], leaf_c);
        assert_eq!(levels[1].len(), 2);
        assert_eq!(levels[1][1], hash_pair(leaf_c, leaf_c));

        let proof = tree.proof(2).unwrap();
        assert_eq!(proof[0], leaf_c);
        assert_eq!(proof.len(), 2);
        assert!(verify_proof(2, &addr(0xc), 30, &proof, &tree.root()));
    }

    #[test]
    fn test_every_leaf_verifies() {
        let entries: Vec<_> = (1..=11u8).map(|i| (addr(i), u128::from(i) * 100)).collect();
        let result = MerkleTree::from_entries(entries.clone()).unwrap().to_result().unwrap();

        assert_eq!(result.token_total, 6_600);
        for (index, (address, amount)) in entries.iter().enumerate() {
            let claim = &result.claims[address];
            assert_eq!(claim.index, index as u64);
            assert_eq!(claim.amount, *amount);
            assert!(result.verify_claim(address));
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let first = MerkleTree::from_entries(abc()).unwrap().to_result().unwrap();
        let second = MerkleTree::from_entries(abc()).unwrap().to_result().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_order_changes_root() {
        let mut reversed = abc();
        reversed.reverse();
        let forward = MerkleTree::from_entries(abc()).unwrap();
        let backward = MerkleTree::from_entries(reversed).unwrap();
        assert_ne!(forward.root(), backward.root());
    }

    #[test]
    fn test_tampered_amount_fails() {
        let tree = MerkleTree::from_entries(abc()).unwrap();
        let proof = tree.proof(1).unwrap();
        assert!(verify_proof(1, &addr(0xb), 20, &proof, &tree.root()));
        assert!(!verify_proof(1, &addr(0xb), 21, &proof, &tree.root()));
        assert!(!verify_proof(0, &addr(0xb), 20, &proof, &tree.root()));

        let mut tampered = abc();
        tampered[1].1 = 21;
        let other = MerkleTree::from_entries(tampered).unwrap();
        assert_ne!(other.root(), tree.root());
        // untouched leaves keep verifying only against their own build
        let proof_a = other.proof(0).unwrap();
        assert!(!verify_proof(0, &addr(0xa), 10, &proof_a, &tree.root()));
    }

    #[test]
    fn test_single_leaf_tree() {
        let tree = MerkleTree::from_entries(vec![(addr(1), 5)]).unwrap();
        assert_eq!(tree.root(), encode_leaf(0, &addr(1), 5));
        assert!(tree.proof(0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_entries() {
        let tree = MerkleTree::from_entries(Vec::new()).unwrap();
        let result = tree.to_result().unwrap();
        assert_eq!(result, MerkleResult::empty());
    }

    #[test]
    fn test_rejects_zero_and_duplicate_addresses() {
        let zero = MerkleTree::from_entries(vec![(Address::ZERO, 1)]);
        assert!(matches!(zero, Err(Error::InvalidEntitlement(_))));

        let dup = MerkleTree::from_entries(vec![(addr(1), 1), (addr(1), 2)]);
        assert!(matches!(dup, Err(Error::InvalidEntitlement(_))));
    }

    #[test]
    fn test_token_total_overflow() {
        let result = MerkleTree::from_entries(vec![(addr(1), u128::MAX), (addr(2), 1)]);
        assert!(matches!(result, Err(Error::AmountOverflow(_))));
    }

    #[test]
    fn test_result_json_shape() {
        let result = MerkleTree::from_entries(abc()).unwrap().to_result().unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert!(json["merkleRoot"].as_str().unwrap().starts_with("0x"));
        assert_eq!(json["tokenTotal"], "60");
        let claim = &json["claims"][addr(0xb).to_checksum()];
        assert_eq!(claim["index"], 1);
        assert_eq!(claim["amount"], "20");
        assert_eq!(claim["proof"].as_array().unwrap().len(), 2);

        let back: MerkleResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
