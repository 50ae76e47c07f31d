// Escrow factory and escrow contract logic, as a deployed contract pair would
// enforce it. Token movements are left to the ledger executing the calls.

use std::collections::HashMap;

use ethers::types::{Address, H256, U256};

use crate::config::ChainSettings;
use crate::data_structures::{ChainId, Side, Timestamp, Window};
use crate::error::{Result, SwapError};
use crate::escrow::rules::{self, Payout};
use crate::escrow::{
    derive_source_address, DstImmutablesComplement, EscrowImmutables, EscrowStatus,
};
use crate::hashlock::{MerkleProof, Secret};
use crate::order::SignedOrder;

/// One deployed escrow.
#[derive(Clone, Debug)]
pub struct EscrowContract {
    pub side: Side,
    pub address: Address,
    pub immutables: EscrowImmutables,
    status: EscrowStatus,
    revealed: Option<Secret>,
    rescue_delay: u64,
}

impl EscrowContract {
    fn deployed(side: Side, address: Address, immutables: EscrowImmutables, rescue_delay: u64) -> Self {
        EscrowContract {
            side,
            address,
            immutables,
            status: EscrowStatus::Deployed,
            revealed: None,
            rescue_delay,
        }
    }

    pub fn status(&self) -> EscrowStatus {
        self.status
    }

    /// Public once a withdrawal succeeded.
    pub fn revealed_secret(&self) -> Option<&Secret> {
        self.revealed.as_ref()
    }

    // Calls carry their own copy of the immutables, as on-chain; a mismatch
    // means the caller is talking about a different escrow.
    fn check_immutables(&self, claimed: &EscrowImmutables) -> Result<()> {
        if claimed.hash()? != self.immutables.hash()? {
            return Err(SwapError::TransactionFailed(format!(
                "immutables do not match escrow {:?}",
                self.address
            )));
        }
        Ok(())
    }

    pub fn withdraw(
        &mut self,
        caller: Address,
        claimed: &EscrowImmutables,
        secret: &Secret,
        proof: Option<&MerkleProof>,
        now: Timestamp,
    ) -> Result<Payout> {
        rules::ensure_active(self.address, self.status)?;
        self.check_immutables(claimed)?;
        rules::authorize_withdraw(self.side, &self.immutables, caller, now)?;
        rules::verify_secret(&self.immutables, secret, proof)?;
        self.status = EscrowStatus::Withdrawn;
        self.revealed = Some(secret.clone());
        Ok(rules::withdraw_payout(self.side, &self.immutables, caller))
    }

    pub fn cancel(&mut self, caller: Address, claimed: &EscrowImmutables, now: Timestamp) -> Result<Payout> {
        rules::ensure_active(self.address, self.status)?;
        self.check_immutables(claimed)?;
        rules::authorize_cancel(self.side, &self.immutables, caller, now)?;
        self.status = EscrowStatus::Cancelled;
        Ok(rules::cancel_payout(self.side, &self.immutables, caller))
    }

    /// Checks a rescue by `caller`. The ledger moves whatever was asked for;
    /// the escrow's own state is untouched.
    pub fn rescue(&self, caller: Address, claimed: &EscrowImmutables, now: Timestamp) -> Result<()> {
        self.check_immutables(claimed)?;
        rules::authorize_rescue(self.address, &self.immutables, caller, now, self.rescue_delay)
    }
}

/// The escrow factory of one ledger. Tracks how much of each order has been
/// filled.
#[derive(Clone, Debug)]
pub struct EscrowFactory {
    pub chain_id: ChainId,
    pub address: Address,
    pub src_implementation: Address,
    pub dst_implementation: Address,
    /// Seconds, handed to every escrow this factory deploys.
    pub rescue_delay: u64,
    filled: HashMap<H256, U256>,
}

impl EscrowFactory {
    pub fn new(settings: &ChainSettings) -> Self {
        EscrowFactory {
            chain_id: settings.chain_id,
            address: settings.escrow_factory,
            src_implementation: settings.src_implementation,
            dst_implementation: settings.dst_implementation,
            rescue_delay: settings.rescue_delay.as_secs(),
            filled: HashMap::new(),
        }
    }

    pub fn filled(&self, order_hash: &H256) -> U256 {
        self.filled.get(order_hash).copied().unwrap_or_default()
    }

    /// Validates a fill of a signed order by `resolver` and returns the new
    /// source escrow and the destination complement announced with it.
    pub fn create_src(
        &mut self,
        signed: &SignedOrder,
        fill_amount: U256,
        resolver: Address,
        now: Timestamp,
    ) -> Result<(EscrowContract, DstImmutablesComplement)> {
        let order = &signed.order;
        signed.verify()?;
        if order.src_chain_id != self.chain_id {
            return Err(SwapError::TransactionFailed(format!(
                "order is for chain {}, this is chain {}",
                order.src_chain_id, self.chain_id
            )));
        }
        if order.escrow_factory != self.address {
            return Err(SwapError::TransactionFailed(format!(
                "order names factory {:?}",
                order.escrow_factory
            )));
        }
        if !order.is_whitelisted(resolver, now) {
            return Err(SwapError::TransactionFailed(format!(
                "resolver {resolver:?} is not whitelisted at {now}"
            )));
        }
        order.validate_fill(fill_amount)?;

        let order_hash = signed.order_hash();
        let already = self.filled(&order_hash);
        let remaining = order.making_amount.saturating_sub(already);
        if fill_amount > remaining {
            return Err(SwapError::invalid_fill(format!(
                "fill {fill_amount} exceeds remaining {remaining}"
            )));
        }

        let immutables = EscrowImmutables {
            order_hash,
            hash_lock: order.hash_lock,
            maker: order.maker,
            taker: resolver,
            token: order.maker_asset,
            amount: fill_amount,
            safety_deposit: order.src_safety_deposit_for(fill_amount)?,
            time_locks: order.time_locks,
            deployed_at: Some(now),
        };
        let complement = DstImmutablesComplement {
            maker: order.receiver(),
            amount: order.taking_amount_for(fill_amount)?,
            token: order.taker_asset,
            safety_deposit: order.dst_safety_deposit,
            chain_id: order.dst_chain_id,
        };
        let address = derive_source_address(&immutables, self.src_implementation, self.address)?;
        self.filled.insert(order_hash, already + fill_amount);
        Ok((
            EscrowContract::deployed(Side::Src, address, immutables, self.rescue_delay),
            complement,
        ))
    }

    /// Stamps `now` as the destination deployment time. The destination
    /// escrow must become cancellable no later than the source one.
    pub fn create_dst(
        &self,
        immutables: &EscrowImmutables,
        src_cancellation: Timestamp,
        caller: Address,
        now: Timestamp,
    ) -> Result<EscrowContract> {
        if caller != immutables.taker {
            return Err(SwapError::TransactionFailed(format!(
                "{caller:?} is not the destination taker"
            )));
        }
        let immutables = immutables.with_deployed_at(now);
        let dst_cancellation = immutables
            .time_locks
            .deadline(Side::Dst, Window::Cancellation, now)?;
        if dst_cancellation > src_cancellation {
            return Err(SwapError::TransactionFailed(format!(
                "destination cancellation at {dst_cancellation} is later than source cancellation at {src_cancellation}"
            )));
        }
        let address = derive_source_address(&immutables, self.dst_implementation, self.address)?;
        Ok(EscrowContract::deployed(Side::Dst, address, immutables, self.rescue_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        maker_wallet, resolver_address, sample_immutables, standard_config, standard_order,
        standard_secret,
    };

    fn factory() -> EscrowFactory {
        EscrowFactory::new(&standard_config().source)
    }

    #[tokio::test]
    async fn src_creation_binds_fill() {
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let mut f = factory();
        let fill = signed.order.making_amount;
        let (escrow, complement) = f.create_src(&signed, fill, resolver_address(), 1_000).unwrap();

        assert_eq!(escrow.status(), EscrowStatus::Deployed);
        assert_eq!(escrow.immutables.amount, fill);
        assert_eq!(escrow.immutables.taker, resolver_address());
        assert_eq!(escrow.immutables.deployed_at, Some(1_000));
        assert_eq!(
            escrow.address,
            derive_source_address(&escrow.immutables, f.src_implementation, f.address).unwrap()
        );
        assert_eq!(complement.amount, signed.order.taking_amount);
        assert_eq!(complement.chain_id, signed.order.dst_chain_id);

        // single-shot order cannot be filled twice
        assert!(matches!(
            f.create_src(&signed, fill, resolver_address(), 1_001),
            Err(SwapError::InvalidFill { .. })
        ));
    }

    #[tokio::test]
    async fn src_creation_rejects_strangers() {
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let fill = signed.order.making_amount;
        assert!(matches!(
            factory().create_src(&signed, fill, Address::repeat_byte(0x77), 1_000),
            Err(SwapError::TransactionFailed(_))
        ));
    }

    #[test]
    fn dst_creation_respects_source_cancellation() {
        let f = EscrowFactory::new(&standard_config().destination);
        let imm = sample_immutables();
        // dst cancellation offset is 101
        assert!(f.create_dst(&imm, 2_101, imm.taker, 2_000).is_ok());
        assert!(f.create_dst(&imm, 2_100, imm.taker, 2_000).is_err());
        assert!(f.create_dst(&imm, 2_101, imm.maker, 2_000).is_err());
    }

    #[test]
    fn withdraw_once_then_finalized() {
        let imm = sample_immutables();
        let mut escrow = EscrowContract::deployed(Side::Src, Address::repeat_byte(0xE5), imm.clone(), 1_800);
        let secret = standard_secret();

        assert!(matches!(
            escrow.withdraw(imm.taker, &imm, &secret, None, 1_005),
            Err(SwapError::TimelockNotElapsed { .. })
        ));
        assert_eq!(
            escrow.withdraw(imm.taker, &imm, &Secret::new([9u8; 32]), None, 1_015),
            Err(SwapError::HashMismatch)
        );
        let payout = escrow.withdraw(imm.taker, &imm, &secret, None, 1_015).unwrap();
        assert_eq!(payout.recipient, imm.taker);
        assert_eq!(escrow.revealed_secret(), Some(&secret));

        let again = escrow.withdraw(imm.taker, &imm, &secret, None, 1_020).unwrap_err();
        assert!(again.is_already_finalized());
        assert!(escrow.cancel(imm.taker, &imm, 5_000).unwrap_err().is_already_finalized());
    }

    #[test]
    fn calls_must_name_the_right_immutables() {
        let imm = sample_immutables();
        let mut escrow = EscrowContract::deployed(Side::Src, Address::repeat_byte(0xE5), imm.clone(), 1_800);
        let wrong = EscrowImmutables { amount: imm.amount + U256::one(), ..imm.clone() };
        assert!(matches!(
            escrow.cancel(imm.taker, &wrong, 5_000),
            Err(SwapError::TransactionFailed(_))
        ));
        assert_eq!(escrow.status(), EscrowStatus::Deployed);
    }

    #[tokio::test]
    async fn source_address_predicted_from_block_time() {
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let order = &signed.order;
        let mut f = factory();
        // what a resolver can compute before submitting, for a candidate block time
        let candidate = EscrowImmutables {
            order_hash: signed.order_hash(),
            hash_lock: order.hash_lock,
            maker: order.maker,
            taker: resolver_address(),
            token: order.maker_asset,
            amount: order.making_amount,
            safety_deposit: order.src_safety_deposit_for(order.making_amount).unwrap(),
            time_locks: order.time_locks,
            deployed_at: None,
        };
        let predicted =
            derive_source_address(&candidate.with_deployed_at(1_000), f.src_implementation, f.address).unwrap();
        let off_by_one =
            derive_source_address(&candidate.with_deployed_at(1_001), f.src_implementation, f.address).unwrap();

        let (escrow, _) = f
            .create_src(&signed, order.making_amount, resolver_address(), 1_000)
            .unwrap();
        assert_eq!(escrow.address, predicted);
        assert_ne!(escrow.address, off_by_one);
    }

    #[test]
    fn rescue_leaves_status_alone() {
        let imm = sample_immutables();
        let mut escrow = EscrowContract::deployed(Side::Src, Address::repeat_byte(0xE5), imm.clone(), 1_800);
        assert!(matches!(
            escrow.rescue(imm.taker, &imm, 2_000),
            Err(SwapError::RescueLocked { remaining: 800, .. })
        ));
        escrow.withdraw(imm.taker, &imm, &standard_secret(), None, 1_015).unwrap();
        assert!(escrow.rescue(imm.taker, &imm, 2_800).is_ok());
        assert!(escrow.rescue(imm.maker, &imm, 2_800).is_err());
        assert_eq!(escrow.status(), EscrowStatus::Withdrawn);
    }
}
