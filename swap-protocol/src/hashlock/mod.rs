//! Hash-lock commitments: a digest is published with the order, the preimage
//! (the secret) is revealed only by a withdrawal.

use std::fmt;

use ethers::types::H256;
use ethers::utils::keccak256;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::{Result, SwapError};

pub mod merkle;

pub use merkle::MerkleProof;

/// Required secret length in bytes.
pub const SECRET_LEN: usize = 32;

/// The preimage of a hash-lock.
///
/// Deliberately not `Serialize` and without `Display`; `Debug` is redacted so
/// that a stray `{:?}` in a log line cannot leak it.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Secret(bytes)
    }

    /// Fresh secret from the OS random source.
    pub fn random() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Secret(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SECRET_LEN] =
            bytes
                .try_into()
                .map_err(|_| SwapError::InvalidSecretLength {
                    expected: SECRET_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Secret(arr))
    }

    pub fn hash(&self) -> H256 {
        H256(keccak256(self.0))
    }

    /// Raw preimage. Only an adapter putting a withdrawal on-chain should
    /// need this.
    pub fn expose(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Commitment bound into an order and into both escrows.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HashLock {
    /// `keccak256(secret)`.
    SingleFill(H256),
    /// Merkle root over per-part leaves; the top 16 bits hold `parts - 1`.
    MultipleFills(H256),
}

impl HashLock {
    pub fn for_single_fill(secret: &[u8]) -> Result<Self> {
        let secret = Secret::from_slice(secret)?;
        Ok(HashLock::SingleFill(secret.hash()))
    }

    pub fn from_secret(secret: &Secret) -> Self {
        HashLock::SingleFill(secret.hash())
    }

    pub fn for_multiple_fills<S: AsRef<[u8]>>(secrets: &[S]) -> Result<Self> {
        let leaves = Self::leaves(secrets)?;
        let root = merkle::root(&leaves).ok_or(SwapError::EmptyFillSet)?;
        Ok(HashLock::MultipleFills(pack_parts(root, leaves.len())))
    }

    /// Proof that `secrets[index]` is part of the multi-fill commitment built
    /// from `secrets`.
    pub fn multiple_fills_proof<S: AsRef<[u8]>>(secrets: &[S], index: usize) -> Result<MerkleProof> {
        let leaves = Self::leaves(secrets)?;
        merkle::proof(&leaves, index).ok_or_else(|| {
            SwapError::invalid_fill(format!(
                "secret index {index} out of range for {} parts",
                leaves.len()
            ))
        })
    }

    fn leaves<S: AsRef<[u8]>>(secrets: &[S]) -> Result<Vec<H256>> {
        if secrets.is_empty() {
            return Err(SwapError::EmptyFillSet);
        }
        if secrets.len() > usize::from(u16::MAX) + 1 {
            return Err(SwapError::invalid_order(format!(
                "{} secrets exceed the 65536 part limit",
                secrets.len()
            )));
        }
        secrets
            .iter()
            .enumerate()
            .map(|(i, s)| Ok(merkle::leaf(i as u64, Secret::from_slice(s.as_ref())?.hash())))
            .collect()
    }

    /// The word published on-chain.
    pub fn value(&self) -> H256 {
        match self {
            HashLock::SingleFill(digest) => *digest,
            HashLock::MultipleFills(root) => *root,
        }
    }

    /// Number of independently fillable parts.
    pub fn parts(&self) -> usize {
        match self {
            HashLock::SingleFill(_) => 1,
            HashLock::MultipleFills(root) => {
                usize::from(u16::from_be_bytes([root[0], root[1]])) + 1
            }
        }
    }

    pub fn is_multiple_fills(&self) -> bool {
        matches!(self, HashLock::MultipleFills(_))
    }

    /// True iff `candidate` opens this commitment. A multi-fill lock also
    /// needs the proof for the part being revealed.
    pub fn verify(&self, candidate: &Secret, proof: Option<&MerkleProof>) -> bool {
        let computed = match (self, proof) {
            (HashLock::SingleFill(_), _) => candidate.hash(),
            (HashLock::MultipleFills(_), Some(proof)) => {
                if proof.index >= self.parts() as u64 {
                    return false;
                }
                let leaf = merkle::leaf(proof.index, candidate.hash());
                pack_parts(merkle::process_proof(leaf, &proof.siblings), self.parts())
            }
            (HashLock::MultipleFills(_), None) => return false,
        };
        computed.as_bytes().ct_eq(self.value().as_bytes()).into()
    }
}

fn pack_parts(root: H256, parts: usize) -> H256 {
    let mut packed = root;
    let tag = (parts - 1) as u16;
    packed[..2].copy_from_slice(&tag.to_be_bytes());
    packed
}
