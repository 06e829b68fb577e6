//! Merkle tree over per-block digests and inclusion proofs
//!
//! The tree uses domain-separated hashing (a `0x00` byte before leaves, a
//! `0x01` byte before inner nodes) so a leaf can never be confused with an
//! inner node, and splits at the largest power of two strictly below the
//! node count. Trees are built fresh from the ordered leaf list on each
//! proof request; epoch lengths are bounded, so this stays cheap.

use crate::error::{Error, Result};
use crate::types::DIGEST_LEN;
use serde::{Deserialize, Serialize};

const LEAF_PREFIX: u8 = 0x00;
const INNER_PREFIX: u8 = 0x01;

/// Hash of a leaf value
pub fn leaf_hash(leaf: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(leaf);
    *hasher.finalize().as_bytes()
}

fn inner_hash(left: &[u8; DIGEST_LEN], right: &[u8; DIGEST_LEN]) -> [u8; DIGEST_LEN] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[INNER_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Largest power of two strictly less than `n`; `n` must be at least 2
fn split_point(n: u64) -> u64 {
    debug_assert!(n >= 2);
    let mut k = 1u64;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// An inclusion proof for one leaf of a Merkle tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Number of leaves in the tree
    pub total: u64,

    /// Index of the proven leaf
    pub index: u64,

    /// Hash of the proven leaf
    pub leaf_hash: [u8; DIGEST_LEN],

    /// Sibling hashes from the leaf up to the root
    pub aunts: Vec<[u8; DIGEST_LEN]>,
}

impl MerkleProof {
    /// Verify this proof against a root and the raw leaf value
    pub fn verify(&self, root: &[u8; DIGEST_LEN], leaf: &[u8]) -> Result<()> {
        if leaf_hash(leaf) != self.leaf_hash {
            return Err(Error::InvalidProof(
                "leaf does not match the proof's leaf hash".to_string(),
            ));
        }
        if self.index >= self.total {
            return Err(Error::InvalidProof(format!(
                "index {} out of range for {} leaves",
                self.index, self.total
            )));
        }
        let computed = compute_root(self.index, self.total, self.leaf_hash, &self.aunts)?;
        if &computed != root {
            return Err(Error::InvalidProof(
                "computed root does not match the expected root".to_string(),
            ));
        }
        Ok(())
    }
}

fn compute_root(
    index: u64,
    total: u64,
    leaf_hash: [u8; DIGEST_LEN],
    aunts: &[[u8; DIGEST_LEN]],
) -> Result<[u8; DIGEST_LEN]> {
    if total == 0 {
        return Err(Error::InvalidProof("proof over zero leaves".to_string()));
    }
    if total == 1 {
        if !aunts.is_empty() {
            return Err(Error::InvalidProof(
                "single-leaf proof must have no aunts".to_string(),
            ));
        }
        return Ok(leaf_hash);
    }
    let (last, rest) = aunts
        .split_last()
        .ok_or_else(|| Error::InvalidProof("proof is missing aunts".to_string()))?;
    let k = split_point(total);
    if index < k {
        let left = compute_root(index, k, leaf_hash, rest)?;
        Ok(inner_hash(&left, last))
    } else {
        let right = compute_root(index - k, total - k, leaf_hash, rest)?;
        Ok(inner_hash(last, &right))
    }
}

/// Compute the Merkle root of an ordered leaf list
pub fn root_from_leaves(leaves: &[Vec<u8>]) -> [u8; DIGEST_LEN] {
    let hashes: Vec<[u8; DIGEST_LEN]> = leaves.iter().map(|l| leaf_hash(l)).collect();
    if hashes.is_empty() {
        return *blake3::Hasher::new().finalize().as_bytes();
    }
    subtree_root(&hashes)
}

fn subtree_root(hashes: &[[u8; DIGEST_LEN]]) -> [u8; DIGEST_LEN] {
    match hashes.len() {
        1 => hashes[0],
        n => {
            let k = split_point(n as u64) as usize;
            let left = subtree_root(&hashes[..k]);
            let right = subtree_root(&hashes[k..]);
            inner_hash(&left, &right)
        }
    }
}

/// Compute the root and an inclusion proof for every leaf
pub fn proofs_from_leaves(leaves: &[Vec<u8>]) -> ([u8; DIGEST_LEN], Vec<MerkleProof>) {
    let hashes: Vec<[u8; DIGEST_LEN]> = leaves.iter().map(|l| leaf_hash(l)).collect();
    if hashes.is_empty() {
        return (*blake3::Hasher::new().finalize().as_bytes(), Vec::new());
    }
    let total = hashes.len() as u64;
    let (root, trails) = subtree_proofs(&hashes);
    let proofs = trails
        .into_iter()
        .enumerate()
        .map(|(i, aunts)| MerkleProof {
            total,
            index: i as u64,
            leaf_hash: hashes[i],
            aunts,
        })
        .collect();
    (root, proofs)
}

/// Root of a subtree plus, for each leaf, its aunt trail ordered leaf-to-root
fn subtree_proofs(hashes: &[[u8; DIGEST_LEN]]) -> ([u8; DIGEST_LEN], Vec<Vec<[u8; DIGEST_LEN]>>) {
    match hashes.len() {
        1 => (hashes[0], vec![Vec::new()]),
        n => {
            let k = split_point(n as u64) as usize;
            let (left_root, mut left_trails) = subtree_proofs(&hashes[..k]);
            let (right_root, mut right_trails) = subtree_proofs(&hashes[k..]);
            for trail in &mut left_trails {
                trail.push(right_root);
            }
            for trail in &mut right_trails {
                trail.push(left_root);
            }
            left_trails.append(&mut right_trails);
            (inner_hash(&left_root, &right_root), left_trails)
        }
    }
}

/// Verify that a block digest is included under an epoch's digest root
///
/// Both the digest and the root must be exactly [`DIGEST_LEN`] bytes;
/// anything else is a caller-input error, not a verification failure.
pub fn verify_digest_inclusion(digest: &[u8], root: &[u8], proof: &MerkleProof) -> Result<()> {
    if digest.len() != DIGEST_LEN {
        return Err(Error::InvalidProof(format!(
            "digest with length {} is not a {}-byte hash",
            digest.len(),
            DIGEST_LEN
        )));
    }
    if root.len() != DIGEST_LEN {
        return Err(Error::InvalidProof(format!(
            "root with length {} is not a {}-byte hash",
            root.len(),
            DIGEST_LEN
        )));
    }
    let root_arr: [u8; DIGEST_LEN] = root
        .try_into()
        .map_err(|_| Error::InvalidProof("root is not a 32-byte hash".to_string()))?;
    proof.verify(&root_arr, digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i as u8; DIGEST_LEN]).collect()
    }

    #[test]
    fn test_round_trip_all_sizes() {
        for n in 1..=17 {
            let leaves = leaves(n);
            let (root, proofs) = proofs_from_leaves(&leaves);
            assert_eq!(root, root_from_leaves(&leaves));
            assert_eq!(proofs.len(), n);
            for (i, proof) in proofs.iter().enumerate() {
                assert_eq!(proof.index, i as u64);
                verify_digest_inclusion(&leaves[i], &root, proof).unwrap();
            }
        }
    }

    #[test]
    fn test_bit_flip_fails() {
        let leaves = leaves(7);
        let (root, proofs) = proofs_from_leaves(&leaves);

        let mut bad_leaf = leaves[3].clone();
        bad_leaf[0] ^= 0x01;
        assert!(verify_digest_inclusion(&bad_leaf, &root, &proofs[3]).is_err());

        let mut bad_proof = proofs[3].clone();
        bad_proof.aunts[0][0] ^= 0x01;
        assert!(verify_digest_inclusion(&leaves[3], &root, &bad_proof).is_err());

        let mut bad_root = root;
        bad_root[31] ^= 0x01;
        assert!(verify_digest_inclusion(&leaves[3], &bad_root, &proofs[3]).is_err());
    }

    #[test]
    fn test_wrong_length_inputs_rejected() {
        let leaves = leaves(2);
        let (root, proofs) = proofs_from_leaves(&leaves);
        assert!(verify_digest_inclusion(&[0u8; 31], &root, &proofs[0]).is_err());
        assert!(verify_digest_inclusion(&leaves[0], &root[..31], &proofs[0]).is_err());
    }

    #[test]
    fn test_proof_for_wrong_index_fails() {
        let leaves = leaves(5);
        let (root, proofs) = proofs_from_leaves(&leaves);
        assert!(verify_digest_inclusion(&leaves[1], &root, &proofs[2]).is_err());
    }

    #[test]
    fn test_leaf_and_inner_domains_differ() {
        let value = [0xabu8; DIGEST_LEN];
        let as_leaf = leaf_hash(&value);
        let as_inner = inner_hash(&value, &value);
        assert_ne!(as_leaf, as_inner);
    }
}
