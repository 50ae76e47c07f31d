//! Drives one swap instance per order hash across the two ledgers:
//! deploy source, deploy destination, then withdraw both legs or cancel.
//!
//! The coordinator acts as the resolver. Every step takes the latest
//! [`SwapContext`] snapshot and returns the next one; the registry keeps the
//! latest snapshot per swap so observers and recovery can pick it up.

use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use super::registry::SwapRegistry;
use super::retry::{sleep_or_abort, with_retry};
use super::types::{
    AbortReason, CancelReceipt, DstDeployReceipt, FillSecret, RescueReceipt, SrcDeployReceipt,
    SwapContext, SwapOutcome, SwapState, WithdrawReceipt,
};
use crate::config::SwapConfig;
use crate::data_structures::{Side, Window};
use crate::error::{Result, SwapError};
use crate::escrow::{
    derive_destination_address, derive_source_address, rules, DstImmutablesComplement, Escrow,
    EscrowImmutables, EscrowStatus,
};
use crate::hashlock::Secret;
use crate::onchain::{ChainAdapter, DeployEvent, DeployEventKind, Receipt, TransactionIntent};
use crate::order::SignedOrder;

// First four bytes of the order hash, for log lines.
fn short(order_hash: &H256) -> String {
    let full = hex::encode(order_hash);
    format!("0x{}", &full[..8])
}

#[derive(Clone)]
pub struct SwapCoordinator {
    config: Arc<SwapConfig>,
    src: Arc<dyn ChainAdapter>,
    dst: Arc<dyn ChainAdapter>,
    registry: SwapRegistry,
}

impl SwapCoordinator {
    /// Both adapters must transact as `config.resolver` on the configured
    /// chains.
    pub fn new(
        config: SwapConfig,
        src: Arc<dyn ChainAdapter>,
        dst: Arc<dyn ChainAdapter>,
    ) -> Result<Self> {
        config.validate()?;
        for (side, adapter) in [(Side::Src, &src), (Side::Dst, &dst)] {
            let expected = config.chain(side).chain_id;
            if adapter.chain_id() != expected {
                return Err(SwapError::Config(format!(
                    "{side} adapter is on chain {}, expected {expected}",
                    adapter.chain_id()
                )));
            }
            if adapter.account() != config.resolver {
                return Err(SwapError::Config(format!(
                    "{side} adapter acts as {:?}, resolver is {:?}",
                    adapter.account(),
                    config.resolver
                )));
            }
        }
        Ok(SwapCoordinator {
            config: Arc::new(config),
            src,
            dst,
            registry: SwapRegistry::new(),
        })
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    fn adapter(&self, side: Side) -> &dyn ChainAdapter {
        match side {
            Side::Src => self.src.as_ref(),
            Side::Dst => self.dst.as_ref(),
        }
    }

    async fn abort_signal(&self, order_hash: &H256) -> Result<watch::Receiver<bool>> {
        self.registry.abort_signal(order_hash).await
    }

    /// Validates a signed order against this coordinator and starts tracking
    /// it in state `Created`.
    pub async fn register(&self, signed: SignedOrder, fill_amount: U256) -> Result<SwapContext> {
        signed.verify()?;
        let order = &signed.order;
        if order.src_chain_id != self.config.source.chain_id
            || order.dst_chain_id != self.config.destination.chain_id
        {
            return Err(SwapError::invalid_order(format!(
                "order routes chain {} -> {}, coordinator serves {} -> {}",
                order.src_chain_id,
                order.dst_chain_id,
                self.config.source.chain_id,
                self.config.destination.chain_id
            )));
        }
        if order.escrow_factory != self.config.source.escrow_factory {
            return Err(SwapError::invalid_order(format!(
                "order names escrow factory {:?}",
                order.escrow_factory
            )));
        }
        if !order
            .resolver_whitelist
            .iter()
            .any(|w| w.address == self.config.resolver)
        {
            return Err(SwapError::invalid_order(format!(
                "resolver {:?} is not whitelisted",
                self.config.resolver
            )));
        }
        order.validate_fill(fill_amount)?;

        let ctx = SwapContext::new(signed, fill_amount);
        self.registry.insert(ctx.clone()).await?;
        info!(
            "Coordinator [{}]: registered fill of {} (chain {} -> {})",
            short(&ctx.order_hash),
            fill_amount,
            self.config.source.chain_id,
            self.config.destination.chain_id
        );
        Ok(ctx)
    }

    // Submits with retries, maps a reverted receipt to an error, then waits
    // for the configured confirmations.
    async fn submit_and_confirm(
        &self,
        side: Side,
        intent: TransactionIntent,
        abort: &mut watch::Receiver<bool>,
        tag: &str,
    ) -> Result<Receipt> {
        let adapter = self.adapter(side);
        let name = intent.name();
        let deploy = matches!(
            intent,
            TransactionIntent::DeploySrc { .. } | TransactionIntent::DeployDst { .. }
        );
        let what = format!("Coordinator [{tag}]: {side} {name}");
        let intent = &intent;
        let receipt = with_retry(&self.config.retry, abort, &what, move || {
            let intent = intent.clone();
            async move {
                let receipt = adapter.submit(intent).await?;
                if receipt.success {
                    return Ok(receipt);
                }
                let reason = receipt
                    .revert_reason
                    .unwrap_or_else(|| "transaction reverted".to_string());
                Err(if deploy {
                    SwapError::DeploymentFailed { reason }
                } else {
                    SwapError::TransactionFailed(reason)
                })
            }
        })
        .await?;
        debug!("{what}: included in block {}", receipt.block);

        let confirmations = self.config.chain(side).confirmations;
        let tx_hash = receipt.tx_hash;
        with_retry(&self.config.retry, abort, &what, move || {
            adapter.await_confirmation(tx_hash, confirmations)
        })
        .await
    }

    async fn deploy_event(
        &self,
        side: Side,
        receipt: &Receipt,
        kind: DeployEventKind,
        order_hash: H256,
        abort: &mut watch::Receiver<bool>,
        tag: &str,
    ) -> Result<DeployEvent> {
        let adapter = self.adapter(side);
        let block = &receipt.block;
        let what = format!("Coordinator [{tag}]: {side} deploy event");
        with_retry(&self.config.retry, abort, &what, move || {
            adapter.parse_deploy_event(block, kind, order_hash)
        })
        .await
    }

    /// Locks the maker's funds in the source escrow. On failure nothing is
    /// locked and the swap ends `Cancelled`.
    pub async fn deploy_source(&self, ctx: &SwapContext) -> Result<(SwapContext, SrcDeployReceipt)> {
        let tag = short(&ctx.order_hash);
        let deploying = ctx.advance(SwapState::SrcDeploying, "deploy source")?;
        self.registry.update(&deploying).await?;

        match self.try_deploy_source(&deploying, &tag).await {
            Ok((escrow, complement, receipt)) => {
                let mut next = deploying
                    .advance(SwapState::SrcDeployed, "deploy source")?
                    .with_escrow(escrow.clone());
                next.complement = Some(complement.clone());
                self.registry.update(&next).await?;
                info!(
                    "Coordinator [{tag}]: source escrow {:?} deployed in block {}, holding {}",
                    escrow.address, receipt.block, escrow.immutables.amount
                );
                Ok((
                    next,
                    SrcDeployReceipt {
                        receipt,
                        escrow,
                        complement,
                    },
                ))
            }
            Err(SwapError::Aborted) => Err(SwapError::Aborted),
            Err(e) => {
                error!("Coordinator [{tag}]: source deployment failed: {e}");
                let failed = deploying
                    .advance(SwapState::Cancelled, "deploy source")?
                    .with_note(format!("source deployment failed: {e}"));
                self.registry.update(&failed).await?;
                Err(e)
            }
        }
    }

    async fn try_deploy_source(
        &self,
        ctx: &SwapContext,
        tag: &str,
    ) -> Result<(Escrow, DstImmutablesComplement, Receipt)> {
        let mut abort = self.abort_signal(&ctx.order_hash).await?;
        let intent = TransactionIntent::DeploySrc {
            order: ctx.signed_order.clone(),
            fill_amount: ctx.fill_amount,
        };
        let receipt = self.submit_and_confirm(Side::Src, intent, &mut abort, tag).await?;
        let event = self
            .deploy_event(
                Side::Src,
                &receipt,
                DeployEventKind::SrcEscrowCreated,
                ctx.order_hash,
                &mut abort,
                tag,
            )
            .await?;

        // Do not trust the event: the address must follow from the immutables
        // and the immutables from the order.
        let settings = &self.config.source;
        let derived = derive_source_address(
            &event.immutables,
            settings.src_implementation,
            settings.escrow_factory,
        )?;
        if derived != event.escrow {
            return Err(SwapError::DeploymentFailed {
                reason: format!(
                    "source escrow reported at {:?}, derived {derived:?}",
                    event.escrow
                ),
            });
        }
        let order = &ctx.signed_order.order;
        let imm = &event.immutables;
        if imm.order_hash != ctx.order_hash
            || imm.hash_lock != order.hash_lock
            || imm.maker != order.maker
            || imm.taker != self.config.resolver
            || imm.token != order.maker_asset
            || imm.amount != ctx.fill_amount
            || imm.time_locks != order.time_locks
            || imm.deployed_at.is_none()
        {
            return Err(SwapError::DeploymentFailed {
                reason: "source escrow immutables do not match the order".into(),
            });
        }
        let complement = event.complement.ok_or_else(|| SwapError::DeploymentFailed {
            reason: "source event carries no destination terms".into(),
        })?;
        if complement.chain_id != self.config.destination.chain_id {
            return Err(SwapError::DeploymentFailed {
                reason: format!("destination terms name chain {}", complement.chain_id),
            });
        }
        let escrow = Escrow {
            side: Side::Src,
            address: event.escrow,
            immutables: event.immutables,
            status: EscrowStatus::Deployed,
        };
        Ok((escrow, complement, receipt))
    }

    /// Locks the resolver's funds in the destination escrow. Fails with
    /// `TimelockExpired` once the source cancellation window is open. On
    /// failure the swap moves to `Cancelling`.
    pub async fn deploy_destination(&self, ctx: &SwapContext) -> Result<(SwapContext, DstDeployReceipt)> {
        let tag = short(&ctx.order_hash);
        let src = ctx.require_escrow(Side::Src, "deploy destination")?.clone();
        let complement = ctx
            .complement
            .clone()
            .ok_or_else(|| SwapError::InvalidTransition {
                from: ctx.state.to_string(),
                action: "deploy destination",
            })?;
        let deploying = ctx.advance(SwapState::DstDeploying, "deploy destination")?;
        self.registry.update(&deploying).await?;

        match self
            .try_deploy_destination(&deploying, &src, &complement, &tag)
            .await
        {
            Ok((escrow, receipt)) => {
                let next = deploying
                    .advance(SwapState::DstDeployed, "deploy destination")?
                    .with_escrow(escrow.clone());
                self.registry.update(&next).await?;
                info!(
                    "Coordinator [{tag}]: destination escrow {:?} deployed in block {}, holding {}",
                    escrow.address, receipt.block, escrow.immutables.amount
                );
                Ok((next, DstDeployReceipt { receipt, escrow }))
            }
            Err(SwapError::Aborted) => Err(SwapError::Aborted),
            Err(e) => {
                warn!("Coordinator [{tag}]: destination deployment failed: {e}");
                let failed = deploying
                    .advance(SwapState::Cancelling, "deploy destination")?
                    .with_note(format!("destination deployment failed: {e}"));
                self.registry.update(&failed).await?;
                Err(e)
            }
        }
    }

    async fn try_deploy_destination(
        &self,
        ctx: &SwapContext,
        src: &Escrow,
        complement: &DstImmutablesComplement,
        tag: &str,
    ) -> Result<(Escrow, Receipt)> {
        let mut abort = self.abort_signal(&ctx.order_hash).await?;
        let resolver = self.config.resolver;
        let src_deployed_at = src.immutables.deployed_at()?;
        let src_cancellation =
            src.immutables
                .time_locks
                .deadline(Side::Src, Window::Cancellation, src_deployed_at)?;

        let src_adapter = self.adapter(Side::Src);
        let what = format!("Coordinator [{tag}]: src clock");
        let src_now = with_retry(&self.config.retry, &mut abort, &what, move || {
            src_adapter.current_time()
        })
        .await?;
        if src_now >= src_cancellation {
            return Err(SwapError::TimelockExpired {
                side: Side::Src,
                window: Window::Cancellation,
            });
        }

        let template = EscrowImmutables {
            deployed_at: None,
            ..EscrowImmutables::for_destination(&src.immutables, complement, resolver, 0)
        };
        let intent = TransactionIntent::DeployDst {
            immutables: template,
            src_cancellation,
        };
        let receipt = self.submit_and_confirm(Side::Dst, intent, &mut abort, tag).await?;
        let event = self
            .deploy_event(
                Side::Dst,
                &receipt,
                DeployEventKind::DstEscrowCreated,
                ctx.order_hash,
                &mut abort,
                tag,
            )
            .await?;

        let deployed_at = event.immutables.deployed_at()?;
        let settings = &self.config.destination;
        let derived = derive_destination_address(
            &src.immutables,
            complement,
            deployed_at,
            resolver,
            settings.dst_implementation,
            settings.escrow_factory,
        )?;
        if derived != event.escrow {
            return Err(SwapError::DeploymentFailed {
                reason: format!(
                    "destination escrow reported at {:?}, derived {derived:?}",
                    event.escrow
                ),
            });
        }
        let escrow = Escrow {
            side: Side::Dst,
            address: event.escrow,
            immutables: event.immutables,
            status: EscrowStatus::Deployed,
        };
        Ok((escrow, receipt))
    }

    /// Suspends until `window` is open on `side`, polling that ledger's clock.
    /// Returns `Aborted` if the swap is aborted meanwhile.
    pub async fn await_window(&self, ctx: &SwapContext, side: Side, window: Window) -> Result<()> {
        let escrow = ctx.require_escrow(side, "await window")?;
        let schedule = &escrow.immutables.time_locks;
        let deployed_at = escrow.immutables.deployed_at()?;
        schedule.offset(side, window)?;

        let tag = short(&ctx.order_hash);
        let mut abort = self.abort_signal(&ctx.order_hash).await?;
        let adapter = self.adapter(side);
        let what = format!("Coordinator [{tag}]: {side} clock");
        loop {
            let now = with_retry(&self.config.retry, &mut abort, &what, move || {
                adapter.current_time()
            })
            .await?;
            if schedule.elapsed(side, window, deployed_at, now) {
                debug!("Coordinator [{tag}]: {side} {window} window open at {now}");
                return Ok(());
            }
            debug!(
                "Coordinator [{tag}]: {side} {window} opens in {}s",
                schedule.remaining(side, window, deployed_at, now)?
            );
            sleep_or_abort(self.config.poll_interval, &mut abort).await?;
        }
    }

    async fn ledger_status(
        &self,
        side: Side,
        escrow: &Escrow,
        abort: &mut watch::Receiver<bool>,
        tag: &str,
    ) -> Result<EscrowStatus> {
        let adapter = self.adapter(side);
        let address = escrow.address;
        let what = format!("Coordinator [{tag}]: {side} escrow status");
        with_retry(&self.config.retry, abort, &what, move || {
            adapter.escrow_status(address)
        })
        .await
    }

    async fn ledger_time(
        &self,
        side: Side,
        abort: &mut watch::Receiver<bool>,
        tag: &str,
    ) -> Result<u64> {
        let adapter = self.adapter(side);
        let what = format!("Coordinator [{tag}]: {side} clock");
        with_retry(&self.config.retry, abort, &what, move || adapter.current_time()).await
    }

    /// Withdraws `side` with `secret`, revealing it on that ledger.
    ///
    /// Checks before spending a transaction: the ledger still holds the
    /// funds (`AlreadyFinalized` otherwise), the secret opens the hash-lock
    /// (`HashMismatch`) and the withdrawal window is open
    /// (`TimelockNotElapsed`).
    pub async fn withdraw(
        &self,
        ctx: &SwapContext,
        side: Side,
        secret: &FillSecret,
    ) -> Result<(SwapContext, WithdrawReceipt)> {
        let tag = short(&ctx.order_hash);
        let escrow = ctx.require_escrow(side, "withdraw")?.clone();
        let mut abort = self.abort_signal(&ctx.order_hash).await?;

        let status = self.ledger_status(side, &escrow, &mut abort, &tag).await?;
        rules::ensure_active(escrow.address, status)?;
        let proof = secret.proof.clone().or_else(|| ctx.proof.clone());
        rules::verify_secret(&escrow.immutables, &secret.secret, proof.as_ref())?;
        let now = self.ledger_time(side, &mut abort, &tag).await?;
        rules::authorize_withdraw(side, &escrow.immutables, self.config.resolver, now)?;

        let intent = TransactionIntent::Withdraw {
            side,
            escrow: escrow.address,
            immutables: escrow.immutables.clone(),
            secret: secret.secret.clone(),
            proof,
        };
        let receipt = self.submit_and_confirm(side, intent, &mut abort, &tag).await?;

        let mut next = ctx.with_escrow(escrow.with_status(EscrowStatus::Withdrawn));
        next.secret_revealed = true;
        let next = next.settled(pending_state(ctx, SwapState::Withdrawing));
        self.registry.update(&next).await?;
        info!(
            "Coordinator [{tag}]: {side} escrow {:?} withdrawn in block {} ({})",
            escrow.address, receipt.block, next.state
        );
        Ok((
            next,
            WithdrawReceipt {
                side,
                escrow: escrow.address,
                receipt: Some(receipt),
            },
        ))
    }

    /// Returns `side`'s funds to their depositor. Fails with
    /// `TimelockNotElapsed` before the cancellation window and
    /// `AlreadyFinalized` once the escrow is settled.
    pub async fn cancel(&self, ctx: &SwapContext, side: Side) -> Result<(SwapContext, CancelReceipt)> {
        let tag = short(&ctx.order_hash);
        let escrow = ctx.require_escrow(side, "cancel")?.clone();
        let mut abort = self.abort_signal(&ctx.order_hash).await?;

        let status = self.ledger_status(side, &escrow, &mut abort, &tag).await?;
        rules::ensure_active(escrow.address, status)?;
        let now = self.ledger_time(side, &mut abort, &tag).await?;
        rules::authorize_cancel(side, &escrow.immutables, self.config.resolver, now)?;

        let intent = TransactionIntent::Cancel {
            side,
            escrow: escrow.address,
            immutables: escrow.immutables.clone(),
        };
        let receipt = self.submit_and_confirm(side, intent, &mut abort, &tag).await?;

        let next = ctx
            .with_escrow(escrow.with_status(EscrowStatus::Cancelled))
            .settled(pending_state(ctx, SwapState::Cancelling));
        self.registry.update(&next).await?;
        info!(
            "Coordinator [{tag}]: {side} escrow {:?} cancelled in block {} ({})",
            escrow.address, receipt.block, next.state
        );
        Ok((
            next,
            CancelReceipt {
                side,
                escrow: escrow.address,
                receipt: Some(receipt),
            },
        ))
    }

    /// Sweeps `amount` of `token` left at `side`'s escrow address to the
    /// resolver. Allowed in any swap state once the ledger's rescue delay has
    /// passed since that escrow's deployment; `RescueLocked` before.
    pub async fn rescue(
        &self,
        ctx: &SwapContext,
        side: Side,
        token: Address,
        amount: U256,
    ) -> Result<RescueReceipt> {
        let tag = short(&ctx.order_hash);
        let escrow = ctx.require_escrow(side, "rescue")?.clone();
        let mut abort = self.abort_signal(&ctx.order_hash).await?;

        let now = self.ledger_time(side, &mut abort, &tag).await?;
        let delay = self.config.chain(side).rescue_delay.as_secs();
        rules::authorize_rescue(escrow.address, &escrow.immutables, self.config.resolver, now, delay)?;

        let intent = TransactionIntent::Rescue {
            side,
            escrow: escrow.address,
            immutables: escrow.immutables.clone(),
            token,
            amount,
        };
        let receipt = self.submit_and_confirm(side, intent, &mut abort, &tag).await?;
        info!(
            "Coordinator [{tag}]: rescued {amount} of {token:?} from {side} escrow {:?} in block {}",
            escrow.address, receipt.block
        );
        let current = self.registry.get(&ctx.order_hash).await?;
        self.registry
            .update(&current.with_note(format!("rescued {amount} of {token:?} from {side} escrow")))
            .await?;
        Ok(RescueReceipt {
            side,
            escrow: escrow.address,
            token,
            amount,
            receipt,
        })
    }

    /// Runs the whole protocol for one fill: both deployments, destination
    /// withdrawal, then source withdrawal, falling back to cancellation.
    ///
    /// Returns `Err` for input that never reached a ledger and for
    /// `Aborted`; every other failure ends in [`SwapOutcome::Cancelled`].
    /// If a refund could not be completed (a ledger stayed unreachable past
    /// the retry budget), the outcome lists only the refunds that went
    /// through and the swap stays `Cancelling` until
    /// [`recover`](Self::recover) finishes it.
    pub async fn execute(
        &self,
        signed: SignedOrder,
        secret: FillSecret,
        fill_amount: U256,
    ) -> Result<SwapOutcome> {
        // Nothing gets locked for a secret that cannot open the order.
        if !signed
            .order
            .hash_lock
            .verify(&secret.secret, secret.proof.as_ref())
        {
            return Err(SwapError::HashMismatch);
        }
        let mut ctx = self.register(signed, fill_amount).await?;
        if secret.proof.is_some() {
            ctx.proof = secret.proof.clone();
            self.registry.update(&ctx).await?;
        }
        let order_hash = ctx.order_hash;

        let ctx = match self.deploy_source(&ctx).await {
            Ok((next, _)) => next,
            Err(SwapError::Aborted) => return Err(SwapError::Aborted),
            Err(e) => {
                let failed = self.registry.get(&order_hash).await?;
                return Ok(SwapOutcome::Cancelled {
                    order_hash,
                    reason: AbortReason::SourceDeployFailed(e.to_string()),
                    refunds: Vec::new(),
                    notes: failed.notes,
                });
            }
        };

        let ctx = match self.deploy_destination(&ctx).await {
            Ok((next, _)) => next,
            Err(SwapError::Aborted) => return Err(SwapError::Aborted),
            Err(e) => {
                let cancelling = self.registry.get(&order_hash).await?;
                return self
                    .refund(cancelling, AbortReason::DestinationDeployFailed(e.to_string()))
                    .await;
            }
        };

        self.withdraw_both(ctx, &secret).await
    }

    // Destination first: that is the reveal. The source leg is attempted even
    // if the destination call failed, since the secret may be public anyway.
    async fn withdraw_both(&self, ctx: SwapContext, secret: &FillSecret) -> Result<SwapOutcome> {
        let order_hash = ctx.order_hash;
        let tag = short(&order_hash);

        let (ctx, dst_receipt) = match self.withdraw_when_open(&ctx, Side::Dst, secret).await {
            Ok((next, receipt)) => (next, Some(receipt)),
            Err(SwapError::Aborted) => return Err(SwapError::Aborted),
            Err(e) => {
                warn!(
                    "Coordinator [{tag}]: destination withdrawal failed: {e}; withdrawing source anyway"
                );
                let current = self.registry.get(&order_hash).await?;
                (current.with_note(format!("destination withdrawal failed: {e}")), None)
            }
        };

        // The copy published on the destination ledger is as good as ours.
        let src_secret = match self.published_secret(&ctx).await {
            Some(published) => FillSecret {
                secret: published,
                proof: secret.proof.clone(),
            },
            None => secret.clone(),
        };
        let (mut ctx, src_receipt) = match self.withdraw_when_open(&ctx, Side::Src, &src_secret).await {
            Ok(done) => done,
            Err(SwapError::Aborted) => return Err(SwapError::Aborted),
            Err(e) => {
                error!("Coordinator [{tag}]: source withdrawal failed: {e}; cancelling");
                let current = self.registry.get(&order_hash).await?;
                return self
                    .refund(current, AbortReason::WithdrawalFailed(e.to_string()))
                    .await;
            }
        };

        // The maker is still owed a destination withdrawal that failed above.
        let dst_receipt = match dst_receipt {
            Some(receipt) => Some(receipt),
            None => match self.withdraw_when_open(&ctx, Side::Dst, secret).await {
                Ok((next, receipt)) => {
                    ctx = next;
                    Some(receipt)
                }
                Err(SwapError::Aborted) => return Err(SwapError::Aborted),
                Err(e) => {
                    error!("Coordinator [{tag}]: destination withdrawal still outstanding: {e}");
                    ctx = SwapContext {
                        state: SwapState::Completed,
                        ..ctx.with_note(format!("destination withdrawal outstanding: {e}"))
                    };
                    self.registry.update(&ctx).await?;
                    None
                }
            },
        };

        info!("Coordinator [{tag}]: swap completed");
        Ok(SwapOutcome::Completed {
            order_hash,
            src: src_receipt,
            dst: dst_receipt,
            notes: ctx.notes,
        })
    }

    // Waits for the private withdrawal window, then withdraws. An escrow
    // someone else already withdrew counts as done.
    async fn withdraw_when_open(
        &self,
        ctx: &SwapContext,
        side: Side,
        secret: &FillSecret,
    ) -> Result<(SwapContext, WithdrawReceipt)> {
        self.await_window(ctx, side, Window::Withdrawal).await?;
        match self.withdraw(ctx, side, secret).await {
            Err(SwapError::AlreadyFinalized {
                escrow,
                status: EscrowStatus::Withdrawn,
            }) => {
                let note = format!("{side} escrow {escrow:?} was already withdrawn");
                info!("Coordinator [{}]: {note}", short(&ctx.order_hash));
                let record = ctx
                    .require_escrow(side, "withdraw")?
                    .with_status(EscrowStatus::Withdrawn);
                let mut next = ctx.with_escrow(record).with_note(note);
                next.secret_revealed = true;
                let next = next.settled(pending_state(ctx, SwapState::Withdrawing));
                self.registry.update(&next).await?;
                Ok((
                    next,
                    WithdrawReceipt {
                        side,
                        escrow,
                        receipt: None,
                    },
                ))
            }
            other => other,
        }
    }

    async fn published_secret(&self, ctx: &SwapContext) -> Option<Secret> {
        let dst = ctx.dst.as_ref()?;
        match self.dst.revealed_secret(dst.address).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(
                    "Coordinator [{}]: could not read destination ledger for the secret: {e}",
                    short(&ctx.order_hash)
                );
                None
            }
        }
    }

    // Cancels every escrow still holding funds once its cancellation window
    // opens, destination first. If the secret is already public the source
    // leg is withdrawn instead of refunded. A leg that cannot be settled now
    // is noted and skipped; the swap then stays `Cancelling` for `recover`.
    async fn refund(&self, ctx: SwapContext, reason: AbortReason) -> Result<SwapOutcome> {
        let order_hash = ctx.order_hash;
        let tag = short(&order_hash);
        let mut ctx = if ctx.state == SwapState::Cancelling {
            ctx
        } else {
            let next = ctx.advance(SwapState::Cancelling, "cancel")?;
            self.registry.update(&next).await?;
            next
        };
        warn!("Coordinator [{tag}]: refunding: {reason}");

        let mut abort = self.abort_signal(&order_hash).await?;
        let mut refunds = Vec::new();
        let mut src_withdrawal = None;
        let mut outstanding = Vec::new();
        let pending: Vec<Escrow> = ctx.active_escrows().into_iter().cloned().collect();
        for escrow in pending {
            let side = escrow.side;
            match self.refund_leg(ctx.clone(), &escrow, &mut abort, &tag).await {
                Ok((next, settled)) => {
                    ctx = next;
                    match settled {
                        Some(LegSettlement::Refunded(receipt)) => refunds.push(receipt),
                        Some(LegSettlement::Withdrawn(receipt)) => src_withdrawal = Some(receipt),
                        None => {}
                    }
                }
                Err(SwapError::Aborted) => return Err(SwapError::Aborted),
                Err(e) => {
                    warn!("Coordinator [{tag}]: {side} refund incomplete: {e}");
                    // pick up whatever the leg managed to record
                    ctx = self
                        .registry
                        .get(&order_hash)
                        .await?
                        .with_note(format!("{side} refund incomplete: {e}"));
                    self.registry.update(&ctx).await?;
                    outstanding.push(side);
                }
            }
        }

        if let Some(src) = src_withdrawal {
            info!("Coordinator [{tag}]: swap completed during refund");
            return Ok(SwapOutcome::Completed {
                order_hash,
                src,
                dst: None,
                notes: ctx.notes,
            });
        }
        if outstanding.is_empty() {
            info!("Coordinator [{tag}]: swap cancelled ({} refunds)", refunds.len());
        } else {
            error!(
                "Coordinator [{tag}]: {} of {} legs refunded, {outstanding:?} still locked; swap left {}",
                refunds.len(),
                refunds.len() + outstanding.len(),
                ctx.state
            );
        }
        Ok(SwapOutcome::Cancelled {
            order_hash,
            reason,
            refunds,
            notes: ctx.notes,
        })
    }

    // Settles one escrow of a refund. `None` when the ledger shows it was
    // already settled some other way.
    async fn refund_leg(
        &self,
        ctx: SwapContext,
        escrow: &Escrow,
        abort: &mut watch::Receiver<bool>,
        tag: &str,
    ) -> Result<(SwapContext, Option<LegSettlement>)> {
        let side = escrow.side;
        let status = self.ledger_status(side, escrow, abort, tag).await?;
        if status != EscrowStatus::Deployed {
            let next = ctx
                .with_escrow(escrow.with_status(status))
                .with_note(format!("{side} escrow already {status}"))
                .settled(SwapState::Cancelling);
            self.registry.update(&next).await?;
            return Ok((next, None));
        }

        if side == Side::Src {
            if let Some(secret) = self.published_secret(&ctx).await {
                info!("Coordinator [{tag}]: secret is public, withdrawing source instead of cancelling");
                let fill = FillSecret {
                    secret,
                    proof: ctx.proof.clone(),
                };
                match self.withdraw_when_open(&ctx, Side::Src, &fill).await {
                    Ok((next, receipt)) => return Ok((next, Some(LegSettlement::Withdrawn(receipt)))),
                    Err(SwapError::Aborted) => return Err(SwapError::Aborted),
                    Err(e) => warn!("Coordinator [{tag}]: source withdrawal failed: {e}"),
                }
            }
        }

        self.await_window(&ctx, side, Window::Cancellation).await?;
        match self.cancel(&ctx, side).await {
            Ok((next, receipt)) => Ok((next, Some(LegSettlement::Refunded(receipt)))),
            Err(SwapError::AlreadyFinalized { escrow, status }) => {
                let next = ctx
                    .with_escrow(ctx.require_escrow(side, "cancel")?.with_status(status))
                    .with_note(format!("{side} escrow {escrow:?} already {status}"))
                    .settled(SwapState::Cancelling);
                self.registry.update(&next).await?;
                let refund = (status == EscrowStatus::Cancelled).then_some(LegSettlement::Refunded(
                    CancelReceipt {
                        side,
                        escrow,
                        receipt: None,
                    },
                ));
                Ok((next, refund))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs several independent fills concurrently. Each swap has its own
    /// registry entry and abort signal, so one failing does not stall the rest.
    pub async fn execute_all(
        &self,
        fills: Vec<(SignedOrder, FillSecret, U256)>,
    ) -> Vec<Result<SwapOutcome>> {
        join_all(
            fills
                .into_iter()
                .map(|(signed, secret, amount)| self.execute(signed, secret, amount)),
        )
        .await
    }

    /// Stops automatic progress of one swap. Funds already locked stay where
    /// they are until [`recover`](Self::recover) cancels them.
    pub async fn abort(&self, order_hash: H256) -> Result<()> {
        self.registry.abort(&order_hash).await?;
        let tag = short(&order_hash);
        warn!("Coordinator [{tag}]: abort requested");
        if self.registry.get(&order_hash).await?.secret_revealed {
            warn!("Coordinator [{tag}]: secret already public, recovery will withdraw the source leg");
        }
        Ok(())
    }

    /// Brings an aborted, stalled or partially refunded swap to a terminal
    /// state through the cancellation path. Safe to call again if a ledger
    /// was still unreachable the first time.
    pub async fn recover(&self, order_hash: H256) -> Result<SwapOutcome> {
        if self.registry.is_aborted(&order_hash).await {
            info!("Coordinator [{}]: resuming aborted swap", short(&order_hash));
        }
        self.registry.clear_abort(&order_hash).await?;
        let ctx = self.registry.get(&order_hash).await?;
        if ctx.state.is_terminal() {
            return Err(SwapError::InvalidTransition {
                from: ctx.state.to_string(),
                action: "recover",
            });
        }
        if ctx.src.is_none() {
            // Nothing confirmed on either ledger.
            let note = format!("stopped while {}, nothing locked", ctx.state);
            let ctx = SwapContext {
                state: SwapState::Cancelled,
                ..ctx.with_note(note)
            };
            self.registry.update(&ctx).await?;
            info!("Coordinator [{}]: recovered, nothing to refund", short(&order_hash));
            return Ok(SwapOutcome::Cancelled {
                order_hash,
                reason: AbortReason::Operator,
                refunds: Vec::new(),
                notes: ctx.notes,
            });
        }
        self.refund(ctx, AbortReason::Operator).await
    }

    pub async fn snapshot(&self, order_hash: H256) -> Result<SwapContext> {
        self.registry.get(&order_hash).await
    }

    pub async fn active_swaps(&self) -> Vec<SwapContext> {
        self.registry.active().await
    }
}

enum LegSettlement {
    Refunded(CancelReceipt),
    Withdrawn(WithdrawReceipt),
}

// Non-terminal state a withdraw or cancel leaves behind: stay in
// `Cancelling` once there, otherwise `fallback`.
fn pending_state(ctx: &SwapContext, fallback: SwapState) -> SwapState {
    if ctx.state == SwapState::Cancelling {
        SwapState::Cancelling
    } else {
        fallback
    }
}
