//! Swap orchestration across the source and destination ledgers.

pub mod registry;
mod retry;
pub mod swap_coordinator;
pub mod types;

pub use registry::SwapRegistry;
pub use swap_coordinator::SwapCoordinator;
pub use types::{
    AbortReason, CancelReceipt, DstDeployReceipt, FillSecret, RescueReceipt, SrcDeployReceipt,
    SwapContext, SwapOutcome, SwapState, WithdrawReceipt,
};
