// In-memory ledger with an accelerated clock. Runs the escrow factory and
// escrow contracts, moves balances, and records deploy events per block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::escrow_contract::{EscrowContract, EscrowFactory};
use super::interface::{
    BlockRef, ChainAdapter, DeployEvent, DeployEventKind, Receipt, TransactionIntent, NATIVE_ASSET,
};
use crate::config::ChainSettings;
use crate::data_structures::{ChainId, Timestamp};
use crate::error::{Result, SwapError};
use crate::escrow::rules::Payout;
use crate::escrow::{EscrowImmutables, EscrowStatus};
use crate::hashlock::{MerkleProof, Secret};
use crate::order::SignedOrder;

#[derive(Clone, Debug)]
pub struct Block {
    pub number: u64,
    pub hash: H256,
    pub timestamp: Timestamp,
    pub events: Vec<DeployEvent>,
}

impl Block {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            number: self.number,
            hash: self.hash,
        }
    }
}

#[derive(Debug)]
pub struct ChainSimulator {
    pub chain_id: ChainId,
    factory: EscrowFactory,
    now: Timestamp,
    // seconds added to the clock every time it is read
    auto_advance: u64,
    blocks: Vec<Block>,
    receipts: HashMap<H256, Receipt>,
    // (account, asset) -> balance
    balances: HashMap<(Address, Address), U256>,
    escrows: HashMap<Address, EscrowContract>,
    tx_count: u64,
}

pub type SharedChain = Arc<Mutex<ChainSimulator>>;

impl ChainSimulator {
    pub fn new(settings: &ChainSettings, genesis_time: Timestamp) -> Self {
        let mut sim = ChainSimulator {
            chain_id: settings.chain_id,
            factory: EscrowFactory::new(settings),
            now: genesis_time,
            auto_advance: 0,
            blocks: Vec::new(),
            receipts: HashMap::new(),
            balances: HashMap::new(),
            escrows: HashMap::new(),
            tx_count: 0,
        };
        sim.mine(Vec::new());
        sim
    }

    pub fn shared(self) -> SharedChain {
        Arc::new(Mutex::new(self))
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn advance_time(&mut self, secs: u64) {
        self.now += secs;
    }

    pub fn set_auto_advance(&mut self, secs: u64) {
        self.auto_advance = secs;
    }

    // Clock read by adapters: returns the current time, then moves it on.
    fn tick(&mut self) -> Timestamp {
        let now = self.now;
        self.now += self.auto_advance;
        now
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn block(&self, number: u64) -> Option<&Block> {
        self.blocks.iter().find(|b| b.number == number)
    }

    pub fn escrow(&self, address: &Address) -> Option<&EscrowContract> {
        self.escrows.get(address)
    }

    pub fn mint(&mut self, account: Address, asset: Address, amount: U256) {
        *self.balances.entry((account, asset)).or_default() += amount;
    }

    pub fn balance(&self, account: Address, asset: Address) -> U256 {
        self.balances
            .get(&(account, asset))
            .copied()
            .unwrap_or_default()
    }

    fn mine(&mut self, events: Vec<DeployEvent>) -> BlockRef {
        let number = self.blocks.len() as u64;
        let mut seed = Vec::with_capacity(24);
        seed.extend_from_slice(&self.chain_id.to_be_bytes());
        seed.extend_from_slice(&number.to_be_bytes());
        seed.extend_from_slice(&self.now.to_be_bytes());
        let block = Block {
            number,
            hash: H256(keccak256(seed)),
            timestamp: self.now,
            events,
        };
        let block_ref = block.block_ref();
        self.blocks.push(block);
        block_ref
    }

    pub fn mine_empty_block(&mut self) -> BlockRef {
        self.mine(Vec::new())
    }

    fn next_tx_hash(&mut self, caller: Address, name: &str) -> H256 {
        self.tx_count += 1;
        let mut seed = Vec::new();
        seed.extend_from_slice(&self.chain_id.to_be_bytes());
        seed.extend_from_slice(&self.tx_count.to_be_bytes());
        seed.extend_from_slice(caller.as_bytes());
        seed.extend_from_slice(name.as_bytes());
        H256(keccak256(seed))
    }

    // Applies every (from, to, asset, amount) leg, or none of them if any
    // sender holds less than the total it owes in an asset.
    fn transfer_all(&mut self, legs: &[(Address, Address, Address, U256)]) -> Result<()> {
        let mut owed: HashMap<(Address, Address), U256> = HashMap::new();
        for (from, _, asset, amount) in legs {
            let total = owed.entry((*from, *asset)).or_default();
            *total = total.saturating_add(*amount);
        }
        for ((from, asset), amount) in &owed {
            let held = self.balance(*from, *asset);
            if held < *amount {
                return Err(SwapError::TransactionFailed(format!(
                    "{from:?} holds {held} of {asset:?}, needs {amount}"
                )));
            }
        }
        for (from, to, asset, amount) in legs {
            *self.balances.entry((*from, *asset)).or_default() -= *amount;
            *self.balances.entry((*to, *asset)).or_default() += *amount;
        }
        Ok(())
    }

    fn pay_out(&mut self, escrow: Address, payout: &Payout) -> Result<()> {
        self.transfer_all(&[
            (escrow, payout.recipient, payout.token, payout.amount),
            (escrow, payout.deposit_recipient, NATIVE_ASSET, payout.safety_deposit),
        ])
    }

    fn contract(&self, escrow: Address) -> Result<&EscrowContract> {
        self.escrows
            .get(&escrow)
            .ok_or_else(|| SwapError::TransactionFailed(format!("no escrow at {escrow:?}")))
    }

    /// Executes `intent` from `caller` in a new block.
    ///
    /// A rejected deployment is mined as a failed receipt. A rejected
    /// escrow call comes back as the escrow's decoded error, nothing is mined
    /// and no state changes.
    pub fn execute(&mut self, caller: Address, intent: TransactionIntent) -> Result<Receipt> {
        let tx_hash = self.next_tx_hash(caller, intent.name());
        let now = self.now;
        let outcome = match intent {
            TransactionIntent::DeploySrc { order, fill_amount } => self
                .deploy_src(caller, &order, fill_amount, now)
                .map(|event| vec![event])
                .map_err(|e| (e, true)),
            TransactionIntent::DeployDst {
                immutables,
                src_cancellation,
            } => self
                .deploy_dst(caller, &immutables, src_cancellation, now)
                .map(|event| vec![event])
                .map_err(|e| (e, true)),
            TransactionIntent::Withdraw {
                escrow,
                immutables,
                secret,
                proof,
                ..
            } => self
                .withdraw_call(caller, escrow, &immutables, &secret, proof.as_ref(), now)
                .map(|_| Vec::new())
                .map_err(|e| (e, false)),
            TransactionIntent::Cancel {
                escrow, immutables, ..
            } => self
                .cancel_call(caller, escrow, &immutables, now)
                .map(|_| Vec::new())
                .map_err(|e| (e, false)),
            TransactionIntent::Rescue {
                escrow,
                immutables,
                token,
                amount,
                ..
            } => self
                .rescue_call(caller, escrow, &immutables, token, amount, now)
                .map(|_| Vec::new())
                .map_err(|e| (e, false)),
        };

        let (events, revert_reason) = match outcome {
            Ok(events) => (events, None),
            Err((err, true)) => {
                warn!("ChainSim {}: deployment reverted: {}", self.chain_id, err);
                (Vec::new(), Some(err.to_string()))
            }
            Err((err, false)) => {
                debug!("ChainSim {}: call rejected: {}", self.chain_id, err);
                return Err(err);
            }
        };
        let block = self.mine(events);
        let receipt = Receipt {
            tx_hash,
            block,
            timestamp: now,
            success: revert_reason.is_none(),
            revert_reason,
        };
        self.receipts.insert(tx_hash, receipt.clone());
        Ok(receipt)
    }

    // Escrow state is committed only once the payout went through.
    fn withdraw_call(
        &mut self,
        caller: Address,
        escrow: Address,
        immutables: &EscrowImmutables,
        secret: &Secret,
        proof: Option<&MerkleProof>,
        now: Timestamp,
    ) -> Result<()> {
        let mut contract = self.contract(escrow)?.clone();
        let payout = contract.withdraw(caller, immutables, secret, proof, now)?;
        self.pay_out(escrow, &payout)?;
        self.escrows.insert(escrow, contract);
        Ok(())
    }

    fn cancel_call(
        &mut self,
        caller: Address,
        escrow: Address,
        immutables: &EscrowImmutables,
        now: Timestamp,
    ) -> Result<()> {
        let mut contract = self.contract(escrow)?.clone();
        let payout = contract.cancel(caller, immutables, now)?;
        self.pay_out(escrow, &payout)?;
        self.escrows.insert(escrow, contract);
        Ok(())
    }

    fn rescue_call(
        &mut self,
        caller: Address,
        escrow: Address,
        immutables: &EscrowImmutables,
        token: Address,
        amount: U256,
        now: Timestamp,
    ) -> Result<()> {
        self.contract(escrow)?.rescue(caller, immutables, now)?;
        self.transfer_all(&[(escrow, caller, token, amount)])?;
        info!(
            "ChainSim {}: rescued {} of {:?} from escrow {:?}",
            self.chain_id, amount, token, escrow
        );
        Ok(())
    }

    fn deploy_src(
        &mut self,
        caller: Address,
        order: &SignedOrder,
        fill_amount: U256,
        now: Timestamp,
    ) -> Result<DeployEvent> {
        let mut factory = self.factory.clone();
        let (contract, complement) = factory.create_src(order, fill_amount, caller, now)?;
        if self.escrows.contains_key(&contract.address) {
            return Err(SwapError::TransactionFailed(format!(
                "escrow {:?} already exists",
                contract.address
            )));
        }
        let imm = &contract.immutables;
        self.transfer_all(&[
            (imm.maker, contract.address, imm.token, imm.amount),
            (caller, contract.address, NATIVE_ASSET, imm.safety_deposit),
        ])?;
        self.factory = factory;
        info!(
            "ChainSim {}: source escrow {:?} locked {} for order 0x{}",
            self.chain_id,
            contract.address,
            imm.amount,
            hex::encode(imm.order_hash)
        );
        let event = DeployEvent {
            kind: DeployEventKind::SrcEscrowCreated,
            escrow: contract.address,
            immutables: contract.immutables.clone(),
            complement: Some(complement),
        };
        self.escrows.insert(contract.address, contract);
        Ok(event)
    }

    fn deploy_dst(
        &mut self,
        caller: Address,
        immutables: &EscrowImmutables,
        src_cancellation: Timestamp,
        now: Timestamp,
    ) -> Result<DeployEvent> {
        let contract = self.factory.create_dst(immutables, src_cancellation, caller, now)?;
        if self.escrows.contains_key(&contract.address) {
            return Err(SwapError::TransactionFailed(format!(
                "escrow {:?} already exists",
                contract.address
            )));
        }
        let imm = &contract.immutables;
        self.transfer_all(&[
            (caller, contract.address, imm.token, imm.amount),
            (caller, contract.address, NATIVE_ASSET, imm.safety_deposit),
        ])?;
        info!(
            "ChainSim {}: destination escrow {:?} locked {} for order 0x{}",
            self.chain_id,
            contract.address,
            imm.amount,
            hex::encode(imm.order_hash)
        );
        let event = DeployEvent {
            kind: DeployEventKind::DstEscrowCreated,
            escrow: contract.address,
            immutables: contract.immutables.clone(),
            complement: None,
        };
        self.escrows.insert(contract.address, contract);
        Ok(event)
    }

    /// Mines empty blocks until `tx_hash` has `confirmations` blocks on top of
    /// and including its own.
    pub fn confirm(&mut self, tx_hash: H256, confirmations: u64) -> Result<Receipt> {
        let receipt = self
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| SwapError::TransactionFailed(format!("unknown transaction {tx_hash:?}")))?;
        loop {
            let depth = self
                .latest_block()
                .map(|b| b.number + 1 - receipt.block.number)
                .unwrap_or(0);
            if depth >= confirmations {
                return Ok(receipt);
            }
            self.mine_empty_block();
        }
    }

    pub fn find_deploy_event(
        &self,
        block: &BlockRef,
        kind: DeployEventKind,
        order_hash: H256,
    ) -> Option<DeployEvent> {
        self.block(block.number)
            .filter(|b| b.hash == block.hash)?
            .events
            .iter()
            .find(|e| e.kind == kind && e.immutables.order_hash == order_hash)
            .cloned()
    }
}

/// A [`ChainAdapter`] over a shared [`ChainSimulator`], acting as one
/// account. Several adapters (maker, resolver) can share one ledger.
#[derive(Clone)]
pub struct SimulatedAdapter {
    chain: SharedChain,
    chain_id: ChainId,
    account: Address,
    offline: Arc<AtomicBool>,
    failing_submissions: Arc<AtomicU32>,
    failing_event_lookups: Arc<AtomicU32>,
}

impl SimulatedAdapter {
    pub fn new(chain: SharedChain, chain_id: ChainId, account: Address) -> Self {
        SimulatedAdapter {
            chain,
            chain_id,
            account,
            offline: Arc::new(AtomicBool::new(false)),
            failing_submissions: Arc::new(AtomicU32::new(0)),
            failing_event_lookups: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Every call fails with `ChainUnavailable` while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next `n` submissions fail with `ChainUnavailable` before reaching
    /// the ledger.
    pub fn fail_next_submissions(&self, n: u32) {
        self.failing_submissions.store(n, Ordering::SeqCst);
    }

    /// The next `n` deploy-event lookups miss, as a lagging indexer would.
    pub fn fail_next_event_lookups(&self, n: u32) {
        self.failing_event_lookups.store(n, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SwapError::ChainUnavailable(format!(
                "chain {} is offline",
                self.chain_id
            )));
        }
        Ok(())
    }

    // Decrements an injected-fault counter; true if a fault fires.
    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChainAdapter for SimulatedAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn account(&self) -> Address {
        self.account
    }

    async fn submit(&self, intent: TransactionIntent) -> Result<Receipt> {
        self.ensure_online()?;
        if Self::take_fault(&self.failing_submissions) {
            return Err(SwapError::ChainUnavailable(format!(
                "chain {}: injected submission failure",
                self.chain_id
            )));
        }
        self.chain.lock().await.execute(self.account, intent)
    }

    async fn await_confirmation(&self, tx_hash: H256, confirmations: u64) -> Result<Receipt> {
        self.ensure_online()?;
        self.chain.lock().await.confirm(tx_hash, confirmations)
    }

    async fn parse_deploy_event(
        &self,
        block: &BlockRef,
        kind: DeployEventKind,
        order_hash: H256,
    ) -> Result<DeployEvent> {
        self.ensure_online()?;
        let not_found = || SwapError::EventNotFound {
            block: block.to_string(),
        };
        if Self::take_fault(&self.failing_event_lookups) {
            return Err(not_found());
        }
        self.chain
            .lock()
            .await
            .find_deploy_event(block, kind, order_hash)
            .ok_or_else(not_found)
    }

    async fn current_time(&self) -> Result<Timestamp> {
        self.ensure_online()?;
        Ok(self.chain.lock().await.tick())
    }

    async fn query_balance(&self, asset: Address, account: Address) -> Result<U256> {
        self.ensure_online()?;
        Ok(self.chain.lock().await.balance(account, asset))
    }

    async fn escrow_status(&self, escrow: Address) -> Result<EscrowStatus> {
        self.ensure_online()?;
        Ok(self
            .chain
            .lock()
            .await
            .escrow(&escrow)
            .map(|e| e.status())
            .unwrap_or(EscrowStatus::Undeployed))
    }

    async fn revealed_secret(&self, escrow: Address) -> Result<Option<Secret>> {
        self.ensure_online()?;
        Ok(self
            .chain
            .lock()
            .await
            .escrow(&escrow)
            .and_then(|e| e.revealed_secret().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        fund_parties, maker_address, maker_wallet, resolver_address, standard_config,
        standard_order, standard_secret, GENESIS_TIME,
    };

    async fn source_chain() -> (SharedChain, SimulatedAdapter) {
        let config = standard_config();
        let chain = ChainSimulator::new(&config.source, GENESIS_TIME).shared();
        fund_parties(&chain).await;
        let adapter = SimulatedAdapter::new(chain.clone(), config.source.chain_id, resolver_address());
        (chain, adapter)
    }

    async fn deployed_source(adapter: &SimulatedAdapter) -> (SignedOrder, DeployEvent) {
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let receipt = adapter
            .submit(TransactionIntent::DeploySrc {
                order: signed.clone(),
                fill_amount: signed.order.making_amount,
            })
            .await
            .unwrap();
        let event = adapter
            .parse_deploy_event(&receipt.block, DeployEventKind::SrcEscrowCreated, signed.order_hash())
            .await
            .unwrap();
        (signed, event)
    }

    #[tokio::test]
    async fn deploy_src_moves_funds_and_emits_event() {
        let (chain, adapter) = source_chain().await;
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let order = signed.order.clone();
        let maker_before = adapter.query_balance(order.maker_asset, maker_address()).await.unwrap();

        let receipt = adapter
            .submit(TransactionIntent::DeploySrc {
                order: signed.clone(),
                fill_amount: order.making_amount,
            })
            .await
            .unwrap();
        assert!(receipt.success);

        let event = adapter
            .parse_deploy_event(&receipt.block, DeployEventKind::SrcEscrowCreated, signed.order_hash())
            .await
            .unwrap();
        assert_eq!(event.immutables.deployed_at, Some(receipt.timestamp));
        assert!(event.complement.is_some());

        let maker_after = adapter.query_balance(order.maker_asset, maker_address()).await.unwrap();
        assert_eq!(maker_before - maker_after, order.making_amount);
        let sim = chain.lock().await;
        assert_eq!(sim.balance(event.escrow, order.maker_asset), order.making_amount);
        assert_eq!(sim.balance(event.escrow, NATIVE_ASSET), order.src_safety_deposit);
    }

    #[tokio::test]
    async fn failed_deploy_is_mined_as_revert() {
        let (_chain, adapter) = source_chain().await;
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let receipt = adapter
            .submit(TransactionIntent::DeploySrc {
                order: signed.clone(),
                fill_amount: U256::from(5u64),
            })
            .await
            .unwrap();
        assert!(!receipt.success);
        assert!(receipt.revert_reason.unwrap().contains("partial"));
        assert!(matches!(
            adapter
                .parse_deploy_event(&receipt.block, DeployEventKind::SrcEscrowCreated, signed.order_hash())
                .await,
            Err(SwapError::EventNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn withdraw_reveals_secret() {
        let (chain, adapter) = source_chain().await;
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let receipt = adapter
            .submit(TransactionIntent::DeploySrc {
                order: signed.clone(),
                fill_amount: signed.order.making_amount,
            })
            .await
            .unwrap();
        let event = adapter
            .parse_deploy_event(&receipt.block, DeployEventKind::SrcEscrowCreated, signed.order_hash())
            .await
            .unwrap();
        assert_eq!(adapter.revealed_secret(event.escrow).await.unwrap(), None);

        chain.lock().await.advance_time(15);
        adapter
            .submit(TransactionIntent::Withdraw {
                side: crate::data_structures::Side::Src,
                escrow: event.escrow,
                immutables: event.immutables.clone(),
                secret: standard_secret(),
                proof: None,
            })
            .await
            .unwrap();
        assert_eq!(adapter.escrow_status(event.escrow).await.unwrap(), EscrowStatus::Withdrawn);
        assert_eq!(adapter.revealed_secret(event.escrow).await.unwrap(), Some(standard_secret()));
        assert_eq!(
            adapter.query_balance(signed.order.maker_asset, resolver_address()).await.unwrap(),
            signed.order.making_amount
        );
    }

    #[tokio::test]
    async fn confirmation_mines_until_depth() {
        let (chain, adapter) = source_chain().await;
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let receipt = adapter
            .submit(TransactionIntent::DeploySrc {
                order: signed.clone(),
                fill_amount: signed.order.making_amount,
            })
            .await
            .unwrap();
        adapter.await_confirmation(receipt.tx_hash, 3).await.unwrap();
        let latest = chain.lock().await.latest_block().map(|b| b.number).unwrap();
        assert_eq!(latest, receipt.block.number + 2);
    }

    #[tokio::test]
    async fn fault_injection() {
        let (chain, adapter) = source_chain().await;
        chain.lock().await.set_auto_advance(5);
        let t0 = adapter.current_time().await.unwrap();
        assert_eq!(adapter.current_time().await.unwrap(), t0 + 5);

        adapter.fail_next_submissions(1);
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let intent = TransactionIntent::DeploySrc {
            order: signed.clone(),
            fill_amount: signed.order.making_amount,
        };
        assert!(matches!(
            adapter.submit(intent.clone()).await,
            Err(SwapError::ChainUnavailable(_))
        ));
        let receipt = adapter.submit(intent).await.unwrap();

        adapter.fail_next_event_lookups(1);
        let kind = DeployEventKind::SrcEscrowCreated;
        assert!(adapter.parse_deploy_event(&receipt.block, kind, signed.order_hash()).await.is_err());
        assert!(adapter.parse_deploy_event(&receipt.block, kind, signed.order_hash()).await.is_ok());

        adapter.set_offline(true);
        assert!(adapter.current_time().await.unwrap_err().is_retryable());
        adapter.set_offline(false);
        assert!(adapter.current_time().await.is_ok());
    }

    #[tokio::test]
    async fn underfunded_payout_changes_nothing() {
        let (chain, adapter) = source_chain().await;
        let (signed, event) = deployed_source(&adapter).await;
        let token = signed.order.maker_asset;
        let deposit = signed.order.src_safety_deposit;
        {
            let mut sim = chain.lock().await;
            // the deposit leg cannot be paid
            sim.balances.insert((event.escrow, NATIVE_ASSET), U256::zero());
            sim.advance_time(15);
        }
        let withdraw = TransactionIntent::Withdraw {
            side: crate::data_structures::Side::Src,
            escrow: event.escrow,
            immutables: event.immutables.clone(),
            secret: standard_secret(),
            proof: None,
        };
        assert!(matches!(
            adapter.submit(withdraw.clone()).await,
            Err(SwapError::TransactionFailed(_))
        ));
        assert_eq!(adapter.escrow_status(event.escrow).await.unwrap(), EscrowStatus::Deployed);
        assert_eq!(adapter.revealed_secret(event.escrow).await.unwrap(), None);
        assert_eq!(adapter.query_balance(token, event.escrow).await.unwrap(), signed.order.making_amount);
        assert_eq!(adapter.query_balance(token, resolver_address()).await.unwrap(), U256::zero());

        // once funded again the same call goes through
        chain.lock().await.mint(event.escrow, NATIVE_ASSET, deposit);
        adapter.submit(withdraw).await.unwrap();
        assert_eq!(adapter.escrow_status(event.escrow).await.unwrap(), EscrowStatus::Withdrawn);
        assert_eq!(adapter.query_balance(token, resolver_address()).await.unwrap(), signed.order.making_amount);
    }

    #[tokio::test]
    async fn rescue_sweeps_stray_tokens_after_delay() {
        let (chain, adapter) = source_chain().await;
        let (_signed, event) = deployed_source(&adapter).await;
        let stray = Address::repeat_byte(0x5A);
        let amount = U256::from(42u64);
        chain.lock().await.mint(event.escrow, stray, amount);
        let rescue = TransactionIntent::Rescue {
            side: crate::data_structures::Side::Src,
            escrow: event.escrow,
            immutables: event.immutables.clone(),
            token: stray,
            amount,
        };

        assert!(matches!(
            adapter.submit(rescue.clone()).await,
            Err(SwapError::RescueLocked { .. })
        ));
        chain.lock().await.advance_time(1_800);
        let maker = SimulatedAdapter::new(chain.clone(), adapter.chain_id(), maker_address());
        assert!(matches!(
            maker.submit(rescue.clone()).await,
            Err(SwapError::TransactionFailed(_))
        ));

        let receipt = adapter.submit(rescue).await.unwrap();
        assert!(receipt.success);
        assert_eq!(adapter.query_balance(stray, resolver_address()).await.unwrap(), amount);
        assert_eq!(adapter.query_balance(stray, event.escrow).await.unwrap(), U256::zero());
        assert_eq!(adapter.escrow_status(event.escrow).await.unwrap(), EscrowStatus::Deployed);
    }
}
