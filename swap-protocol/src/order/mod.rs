//! The maker's signed swap intent.

use ethers::types::{Address, U256};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::data_structures::{AuctionDetails, ChainId, Timestamp, WhitelistEntry};
use crate::error::{Result, SwapError};
use crate::hashlock::HashLock;
use crate::timelock::TimeLockSchedule;

pub mod hashing;
pub mod signing;

pub use signing::{OrderSigner, SignedOrder};

/// Width of the order nonce.
pub const NONCE_BITS: u32 = 40;
pub const MAX_NONCE: u64 = (1 << NONCE_BITS) - 1;

/// Who trades what, and how much.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyTerms {
    pub maker: Address,
    /// Destination-side recipient; zero means the maker itself.
    #[serde(default)]
    pub receiver: Address,
    pub maker_asset: Address,
    pub taker_asset: Address,
    pub making_amount: U256,
    pub taking_amount: U256,
}

/// The escrow-level terms: commitment, deadlines, ledgers, collateral.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTerms {
    pub hash_lock: HashLock,
    pub time_locks: TimeLockSchedule,
    pub src_chain_id: ChainId,
    pub dst_chain_id: ChainId,
    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,
}

/// Matching-layer parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTerms {
    pub auction: AuctionDetails,
    pub whitelist: Vec<WhitelistEntry>,
    pub resolving_start_time: Timestamp,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraTerms {
    pub salt: U256,
    pub nonce: u64,
    pub allow_partial_fills: bool,
    pub allow_multiple_fills: bool,
}

/// A cross-chain order. Treat as frozen once its hash has been signed: any
/// field change produces a different [`order_hash`](Order::order_hash) and
/// invalidates the signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub escrow_factory: Address,
    pub maker: Address,
    pub receiver: Address,
    pub maker_asset: Address,
    pub taker_asset: Address,
    pub making_amount: U256,
    pub taking_amount: U256,
    pub src_chain_id: ChainId,
    pub dst_chain_id: ChainId,
    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,
    pub hash_lock: HashLock,
    pub time_locks: TimeLockSchedule,
    pub auction: AuctionDetails,
    pub resolver_whitelist: Vec<WhitelistEntry>,
    pub resolving_start_time: Timestamp,
    pub salt: U256,
    pub nonce: u64,
    pub allow_partial_fills: bool,
    pub allow_multiple_fills: bool,
}

impl Order {
    pub fn build(
        escrow_factory: Address,
        party: PartyTerms,
        lock: LockTerms,
        market: MarketTerms,
        extra: ExtraTerms,
    ) -> Result<Self> {
        let order = Order {
            escrow_factory,
            maker: party.maker,
            receiver: party.receiver,
            maker_asset: party.maker_asset,
            taker_asset: party.taker_asset,
            making_amount: party.making_amount,
            taking_amount: party.taking_amount,
            src_chain_id: lock.src_chain_id,
            dst_chain_id: lock.dst_chain_id,
            src_safety_deposit: lock.src_safety_deposit,
            dst_safety_deposit: lock.dst_safety_deposit,
            hash_lock: lock.hash_lock,
            time_locks: lock.time_locks,
            auction: market.auction,
            resolver_whitelist: market.whitelist,
            resolving_start_time: market.resolving_start_time,
            salt: extra.salt,
            nonce: extra.nonce,
            allow_partial_fills: extra.allow_partial_fills,
            allow_multiple_fills: extra.allow_multiple_fills,
        };
        order.validate()?;
        Ok(order)
    }

    /// Checks every construction invariant. Also run on orders received over
    /// the wire, since deserialization bypasses [`build`](Self::build).
    pub fn validate(&self) -> Result<()> {
        if self.making_amount.is_zero() {
            return Err(SwapError::invalid_order("making amount must be positive"));
        }
        if self.taking_amount.is_zero() {
            return Err(SwapError::invalid_order("taking amount must be positive"));
        }
        if self.src_chain_id == self.dst_chain_id {
            return Err(SwapError::invalid_order(format!(
                "source and destination chain are both {}",
                self.src_chain_id
            )));
        }
        if self.nonce > MAX_NONCE {
            return Err(SwapError::invalid_order(format!(
                "nonce {} does not fit in {NONCE_BITS} bits",
                self.nonce
            )));
        }
        if self.hash_lock.value().is_zero() {
            return Err(SwapError::invalid_order("hash-lock is empty"));
        }
        if self.maker.is_zero() {
            return Err(SwapError::invalid_order("maker is the zero address"));
        }
        if self.resolver_whitelist.is_empty() {
            return Err(SwapError::invalid_order("resolver whitelist is empty"));
        }
        match (self.hash_lock.is_multiple_fills(), self.allow_multiple_fills) {
            (true, false) => {
                return Err(SwapError::invalid_order(
                    "multi-fill hash-lock on an order without multiple fills",
                ))
            }
            (false, true) => {
                return Err(SwapError::invalid_order(
                    "multiple fills need a multi-fill hash-lock",
                ))
            }
            _ => {}
        }
        // Deserialized schedules are already validated; this keeps hand-built
        // orders honest too.
        TimeLockSchedule::new(*self.time_locks.offsets())?;
        Ok(())
    }

    /// Where the destination funds go.
    pub fn receiver(&self) -> Address {
        if self.receiver.is_zero() {
            self.maker
        } else {
            self.receiver
        }
    }

    /// `resolver` may fill this order at `now`.
    pub fn is_whitelisted(&self, resolver: Address, now: Timestamp) -> bool {
        now >= self.resolving_start_time
            && self
                .resolver_whitelist
                .iter()
                .any(|w| w.address == resolver && w.allow_from <= now)
    }

    pub fn validate_fill(&self, fill_amount: U256) -> Result<()> {
        if fill_amount.is_zero() {
            return Err(SwapError::invalid_fill("fill amount must be positive"));
        }
        if fill_amount > self.making_amount {
            return Err(SwapError::invalid_fill(format!(
                "fill {fill_amount} exceeds making amount {}",
                self.making_amount
            )));
        }
        if fill_amount != self.making_amount && !self.allow_partial_fills {
            return Err(SwapError::invalid_fill(
                "order does not allow partial fills",
            ));
        }
        Ok(())
    }

    /// Destination amount owed for a source fill, rounded up in the maker's
    /// favour.
    pub fn taking_amount_for(&self, fill_amount: U256) -> Result<U256> {
        let product = self
            .taking_amount
            .checked_mul(fill_amount)
            .ok_or_else(|| SwapError::invalid_fill("taking amount overflow"))?;
        Ok((product + self.making_amount - U256::one()) / self.making_amount)
    }

    /// Source safety deposit pro-rated to the fill.
    pub fn src_safety_deposit_for(&self, fill_amount: U256) -> Result<U256> {
        let product = self
            .src_safety_deposit
            .checked_mul(fill_amount)
            .ok_or_else(|| SwapError::invalid_fill("safety deposit overflow"))?;
        Ok(product / self.making_amount)
    }

    pub fn random_salt() -> U256 {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        U256::from_big_endian(&bytes)
    }

    pub fn random_nonce() -> u64 {
        OsRng.gen_range(0..=MAX_NONCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashlock::Secret;
    use crate::timelock::TimeLockOffsets;

    fn terms() -> (PartyTerms, LockTerms, MarketTerms, ExtraTerms) {
        let secret = Secret::new([7u8; 32]);
        (
            PartyTerms {
                maker: Address::repeat_byte(0x11),
                receiver: Address::zero(),
                maker_asset: Address::repeat_byte(0xA1),
                taker_asset: Address::repeat_byte(0xB1),
                making_amount: U256::from(1_000_000u64),
                taking_amount: U256::from(2_000_000u64),
            },
            LockTerms {
                hash_lock: HashLock::from_secret(&secret),
                time_locks: TimeLockSchedule::new(TimeLockOffsets {
                    src_withdrawal: 10,
                    src_public_withdrawal: 120,
                    src_cancellation: 121,
                    src_public_cancellation: 122,
                    dst_withdrawal: 10,
                    dst_public_withdrawal: 100,
                    dst_cancellation: 101,
                })
                .unwrap(),
                src_chain_id: 1,
                dst_chain_id: 137,
                src_safety_deposit: U256::from(10_000u64),
                dst_safety_deposit: U256::from(10_000u64),
            },
            MarketTerms {
                auction: AuctionDetails::default(),
                whitelist: vec![WhitelistEntry {
                    address: Address::repeat_byte(0x22),
                    allow_from: 0,
                }],
                resolving_start_time: 0,
            },
            ExtraTerms {
                salt: U256::from(42u64),
                nonce: 7,
                allow_partial_fills: false,
                allow_multiple_fills: false,
            },
        )
    }

    fn build(
        f: impl FnOnce(&mut PartyTerms, &mut LockTerms, &mut MarketTerms, &mut ExtraTerms),
    ) -> Result<Order> {
        let (mut p, mut l, mut m, mut e) = terms();
        f(&mut p, &mut l, &mut m, &mut e);
        Order::build(Address::repeat_byte(0xFA), p, l, m, e)
    }

    fn reason(err: SwapError) -> String {
        match err {
            SwapError::InvalidOrder { reason } => reason,
            other => panic!("expected InvalidOrder, got {other:?}"),
        }
    }

    #[test]
    fn builds_valid_order() {
        let order = build(|_, _, _, _| {}).unwrap();
        assert!(!order.allow_partial_fills && !order.allow_multiple_fills);
        assert_eq!(order.receiver(), order.maker);
    }

    #[test]
    fn rejects_zero_amounts() {
        let err = build(|p, _, _, _| p.making_amount = U256::zero()).unwrap_err();
        assert!(reason(err).contains("making amount"));
        let err = build(|p, _, _, _| p.taking_amount = U256::zero()).unwrap_err();
        assert!(reason(err).contains("taking amount"));
    }

    #[test]
    fn rejects_same_chain() {
        let err = build(|_, l, _, _| l.dst_chain_id = l.src_chain_id).unwrap_err();
        assert!(reason(err).contains("chain"));
    }

    #[test]
    fn nonce_is_bounded_to_40_bits() {
        assert!(build(|_, _, _, e| e.nonce = MAX_NONCE).is_ok());
        let err = build(|_, _, _, e| e.nonce = MAX_NONCE + 1).unwrap_err();
        assert!(reason(err).contains("40 bits"));
        assert!(Order::random_nonce() <= MAX_NONCE);
    }

    #[test]
    fn rejects_empty_hash_lock_and_whitelist() {
        let err = build(|_, l, _, _| l.hash_lock = HashLock::SingleFill(Default::default())).unwrap_err();
        assert!(reason(err).contains("hash-lock"));
        let err = build(|_, _, m, _| m.whitelist.clear()).unwrap_err();
        assert!(reason(err).contains("whitelist"));
    }

    #[test]
    fn hash_lock_kind_must_match_fill_mode() {
        let err = build(|_, _, _, e| e.allow_multiple_fills = true).unwrap_err();
        assert!(reason(err).contains("multi-fill"));

        let secrets = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let multi = HashLock::for_multiple_fills(&secrets).unwrap();
        let err = build(|_, l, _, _| l.hash_lock = multi).unwrap_err();
        assert!(reason(err).contains("multi-fill"));

        let order = build(|_, l, _, e| {
            l.hash_lock = multi;
            e.allow_multiple_fills = true;
            e.allow_partial_fills = true;
        })
        .unwrap();
        assert!(order.allow_multiple_fills);
    }

    #[test]
    fn fill_validation() {
        let order = build(|_, _, _, _| {}).unwrap();
        assert!(order.validate_fill(order.making_amount).is_ok());
        assert!(matches!(order.validate_fill(U256::zero()), Err(SwapError::InvalidFill { .. })));
        assert!(matches!(
            order.validate_fill(order.making_amount + U256::one()),
            Err(SwapError::InvalidFill { .. })
        ));
        assert!(matches!(
            order.validate_fill(U256::from(10u64)),
            Err(SwapError::InvalidFill { .. })
        ));

        let partial = build(|_, _, _, e| e.allow_partial_fills = true).unwrap();
        assert!(partial.validate_fill(U256::from(10u64)).is_ok());
    }

    #[test]
    fn pro_rated_amounts() {
        let order = build(|_, _, _, e| e.allow_partial_fills = true).unwrap();
        assert_eq!(order.taking_amount_for(order.making_amount).unwrap(), order.taking_amount);
        assert_eq!(order.taking_amount_for(U256::from(250_000u64)).unwrap(), U256::from(500_000u64));
        // rounds up
        assert_eq!(order.taking_amount_for(U256::from(1u64)).unwrap(), U256::from(2u64));
        assert_eq!(order.src_safety_deposit_for(U256::from(500_000u64)).unwrap(), U256::from(5_000u64));
    }

    #[test]
    fn whitelist_respects_allow_from() {
        let order = build(|_, _, m, _| {
            m.whitelist[0].allow_from = 100;
            m.resolving_start_time = 50;
        })
        .unwrap();
        let resolver = Address::repeat_byte(0x22);
        assert!(!order.is_whitelisted(resolver, 99));
        assert!(order.is_whitelisted(resolver, 100));
        assert!(!order.is_whitelisted(Address::repeat_byte(0x33), 1_000));
    }
}
