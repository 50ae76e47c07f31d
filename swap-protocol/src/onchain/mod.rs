// Ledger side of the protocol: the adapter seam the coordinator calls into,
// the escrow contract logic, and an in-memory ledger running both.

pub mod chain_simulator;
pub mod escrow_contract;
pub mod interface;

pub use chain_simulator::{ChainSimulator, SharedChain, SimulatedAdapter};
pub use escrow_contract::EscrowContract;
pub use interface::{
    BlockRef, ChainAdapter, DeployEvent, DeployEventKind, Receipt, TransactionIntent, NATIVE_ASSET,
};
