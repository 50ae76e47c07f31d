// Merkle tree over per-part secret hashes, for orders that can be filled in
// several independent parts. Pairs are hashed sorted, so a proof only needs
// the sibling hashes and not their left/right position.

use ethers::types::H256;
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// Proof that the secret for part `index` belongs to a multi-fill hash-lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: u64,
    pub siblings: Vec<H256>,
}

/// Leaf committed for part `index`: keccak256(index_be ‖ secret_hash).
pub fn leaf(index: u64, secret_hash: H256) -> H256 {
    let mut buf = [0u8; 40];
    buf[..8].copy_from_slice(&index.to_be_bytes());
    buf[8..].copy_from_slice(secret_hash.as_bytes());
    H256(keccak256(buf))
}

fn hash_pair(a: H256, b: H256) -> H256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_bytes());
    buf[32..].copy_from_slice(hi.as_bytes());
    H256(keccak256(buf))
}

// Every layer from leaves up to the single root. An odd node at the end of a
// layer is carried up unchanged.
fn layers(leaves: Vec<H256>) -> Vec<Vec<H256>> {
    let mut layers = vec![leaves];
    loop {
        let prev = &layers[layers.len() - 1];
        if prev.len() <= 1 {
            break;
        }
        let next = prev
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => hash_pair(*a, *b),
                [a] => *a,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        layers.push(next);
    }
    layers
}

/// Root over `leaves`. Returns `None` for an empty set.
pub fn root(leaves: &[H256]) -> Option<H256> {
    if leaves.is_empty() {
        return None;
    }
    layers(leaves.to_vec()).last().and_then(|l| l.first().copied())
}

/// Sibling path for the leaf at `index`, or `None` if out of range.
pub fn proof(leaves: &[H256], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }
    let mut siblings = Vec::new();
    let mut pos = index;
    for layer in layers(leaves.to_vec()).iter().filter(|l| l.len() > 1) {
        let sibling = pos ^ 1;
        if sibling < layer.len() {
            siblings.push(layer[sibling]);
        }
        pos /= 2;
    }
    Some(MerkleProof {
        index: index as u64,
        siblings,
    })
}

/// Folds `leaf` up through `siblings` and returns the resulting root.
pub fn process_proof(leaf: H256, siblings: &[H256]) -> H256 {
    siblings.iter().fold(leaf, |acc, s| hash_pair(acc, *s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u64) -> Vec<H256> {
        (0..n).map(|i| leaf(i, H256(keccak256(i.to_be_bytes())))).collect()
    }

    #[test]
    fn root_of_single_leaf_is_the_leaf() {
        let l = leaves(1);
        assert_eq!(root(&l), Some(l[0]));
        assert_eq!(root(&[]), None);
    }

    #[test]
    fn every_proof_folds_to_root() {
        for n in [2u64, 3, 4, 5, 8, 11] {
            let l = leaves(n);
            let r = root(&l).unwrap();
            for i in 0..l.len() {
                let p = proof(&l, i).unwrap();
                assert_eq!(p.index, i as u64);
                assert_eq!(process_proof(l[i], &p.siblings), r, "n={n} i={i}");
            }
        }
    }

    #[test]
    fn proof_for_wrong_leaf_fails() {
        let l = leaves(4);
        let r = root(&l).unwrap();
        let p = proof(&l, 1).unwrap();
        assert_ne!(process_proof(l[2], &p.siblings), r);
        assert!(proof(&l, 4).is_none());
    }

    #[test]
    fn leaf_binds_index() {
        let h = H256::repeat_byte(7);
        assert_ne!(leaf(0, h), leaf(1, h));
    }
}
