// Arena of swap snapshots keyed by order hash. Each entry also owns the abort
// signal of its swap, so one swap can be stopped without touching the rest.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::H256;
use tokio::sync::{watch, RwLock};

use super::types::SwapContext;
use crate::error::{Result, SwapError};

struct Entry {
    context: SwapContext,
    abort: watch::Sender<bool>,
}

#[derive(Clone, Default)]
pub struct SwapRegistry {
    entries: Arc<RwLock<HashMap<H256, Entry>>>,
}

impl SwapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new swap. An order hash can only be registered once.
    pub async fn insert(&self, context: SwapContext) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&context.order_hash) {
            return Err(SwapError::InvalidTransition {
                from: existing.context.state.to_string(),
                action: "register",
            });
        }
        let (abort, _) = watch::channel(false);
        entries.insert(context.order_hash, Entry { context, abort });
        Ok(())
    }

    /// Replaces the stored snapshot with `context`.
    pub async fn update(&self, context: &SwapContext) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&context.order_hash)
            .ok_or(SwapError::UnknownSwap(context.order_hash))?;
        entry.context = context.clone();
        Ok(())
    }

    pub async fn get(&self, order_hash: &H256) -> Result<SwapContext> {
        self.entries
            .read()
            .await
            .get(order_hash)
            .map(|e| e.context.clone())
            .ok_or(SwapError::UnknownSwap(*order_hash))
    }

    pub async fn abort(&self, order_hash: &H256) -> Result<()> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(order_hash)
            .ok_or(SwapError::UnknownSwap(*order_hash))?;
        entry.abort.send_replace(true);
        Ok(())
    }

    pub async fn is_aborted(&self, order_hash: &H256) -> bool {
        self.entries
            .read()
            .await
            .get(order_hash)
            .map(|e| *e.abort.borrow())
            .unwrap_or(false)
    }

    pub async fn abort_signal(&self, order_hash: &H256) -> Result<watch::Receiver<bool>> {
        self.entries
            .read()
            .await
            .get(order_hash)
            .map(|e| e.abort.subscribe())
            .ok_or(SwapError::UnknownSwap(*order_hash))
    }

    /// Clears the abort flag so recovery can wait on windows again.
    pub async fn clear_abort(&self, order_hash: &H256) -> Result<()> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(order_hash)
            .ok_or(SwapError::UnknownSwap(*order_hash))?;
        entry.abort.send_replace(false);
        Ok(())
    }

    /// Snapshots of every swap not yet completed or cancelled.
    pub async fn active(&self) -> Vec<SwapContext> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.context.state.is_terminal())
            .map(|e| e.context.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cross_chain::types::SwapState;
    use crate::test_utils::signed_standard_order;
    use ethers::types::U256;

    async fn context() -> SwapContext {
        SwapContext::new(signed_standard_order().await, U256::from(1_000_000u64))
    }

    #[tokio::test]
    async fn insert_get_update() {
        let registry = SwapRegistry::new();
        let ctx = context().await;
        registry.insert(ctx.clone()).await.unwrap();
        assert!(matches!(
            registry.insert(ctx.clone()).await,
            Err(SwapError::InvalidTransition { action: "register", .. })
        ));

        let next = ctx.advance(SwapState::SrcDeploying, "deploy source").unwrap();
        registry.update(&next).await.unwrap();
        assert_eq!(registry.get(&ctx.order_hash).await.unwrap().state, SwapState::SrcDeploying);
        assert_eq!(registry.active().await.len(), 1);

        assert!(matches!(
            registry.get(&H256::zero()).await,
            Err(SwapError::UnknownSwap(_))
        ));
    }

    #[tokio::test]
    async fn abort_reaches_subscribers() {
        let registry = SwapRegistry::new();
        let ctx = context().await;
        registry.insert(ctx.clone()).await.unwrap();
        let mut rx = registry.abort_signal(&ctx.order_hash).await.unwrap();
        assert!(!*rx.borrow());

        registry.abort(&ctx.order_hash).await.unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(registry.is_aborted(&ctx.order_hash).await);

        registry.clear_abort(&ctx.order_hash).await.unwrap();
        assert!(!registry.is_aborted(&ctx.order_hash).await);
    }
}
