//! Escrow snapshots, addresses and the access rules an escrow enforces.

use std::fmt;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::data_structures::Side;

pub mod address;
pub mod immutables;
pub mod rules;

pub use address::{derive_destination_address, derive_source_address};
pub use immutables::{DstImmutablesComplement, EscrowImmutables};

/// Lifecycle of one escrow. `Withdrawn` and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Address computable, nothing on-chain yet.
    Undeployed,
    /// Funded; the side's clock is running.
    Deployed,
    Withdrawn,
    Cancelled,
}

impl EscrowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EscrowStatus::Withdrawn | EscrowStatus::Cancelled)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EscrowStatus::Undeployed => "undeployed",
            EscrowStatus::Deployed => "deployed",
            EscrowStatus::Withdrawn => "withdrawn",
            EscrowStatus::Cancelled => "cancelled",
        })
    }
}

/// The coordinator's record of one escrow. The ledger stays authoritative for
/// funds and terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub side: Side,
    pub address: Address,
    pub immutables: EscrowImmutables,
    pub status: EscrowStatus,
}

impl Escrow {
    pub fn with_status(&self, status: EscrowStatus) -> Self {
        Escrow {
            status,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!EscrowStatus::Undeployed.is_terminal());
        assert!(!EscrowStatus::Deployed.is_terminal());
        assert!(EscrowStatus::Withdrawn.is_terminal());
        assert!(EscrowStatus::Cancelled.is_terminal());
        assert_eq!(EscrowStatus::Cancelled.to_string(), "cancelled");
    }
}
