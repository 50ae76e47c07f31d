use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256};
use serde::{Deserialize, Serialize};

use super::Order;
use crate::data_structures::ChainId;
use crate::error::{Result, SwapError};

/// Anything able to sign a 32-byte order hash for the maker: a local key, a
/// remote signer, a hardware wallet.
#[async_trait]
pub trait OrderSigner: Send + Sync {
    fn signer_address(&self) -> Address;

    async fn sign_order_hash(&self, order_hash: H256) -> Result<Signature>;
}

#[async_trait]
impl OrderSigner for LocalWallet {
    fn signer_address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign_order_hash(&self, order_hash: H256) -> Result<Signature> {
        Ok(self.sign_hash(order_hash)?)
    }
}

/// An order together with the maker's signature over its source-chain hash.
/// The signature travels as 65 raw bytes `r ‖ s ‖ v`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOrder {
    pub order: Order,
    #[serde(with = "serde_bytes")]
    signature: Vec<u8>,
}

impl SignedOrder {
    pub fn new(order: Order, signature: Signature) -> Self {
        SignedOrder {
            order,
            signature: signature.to_vec(),
        }
    }

    pub fn signature(&self) -> Result<Signature> {
        Ok(Signature::try_from(self.signature.as_slice())?)
    }

    pub fn order_hash(&self) -> H256 {
        self.order.src_order_hash()
    }

    /// Re-validates the order and checks the signature recovers to the maker.
    pub fn verify(&self) -> Result<()> {
        self.order.validate()?;
        self.order
            .verify_signature(self.order.src_chain_id, &self.signature()?)
    }
}

impl Order {
    /// Signs the source-chain order hash. The signer must be the maker.
    pub async fn sign<S: OrderSigner + ?Sized>(&self, signer: &S) -> Result<SignedOrder> {
        if signer.signer_address() != self.maker {
            return Err(SwapError::Signing(format!(
                "signer {:?} is not the maker {:?}",
                signer.signer_address(),
                self.maker
            )));
        }
        let signature = signer.sign_order_hash(self.src_order_hash()).await?;
        Ok(SignedOrder::new(self.clone(), signature))
    }

    pub fn verify_signature(&self, chain_id: ChainId, signature: &Signature) -> Result<()> {
        let recovered = signature.recover(self.order_hash(chain_id))?;
        if recovered != self.maker {
            return Err(SwapError::Signing(format!(
                "signature recovers to {recovered:?}, expected maker {:?}",
                self.maker
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{maker_wallet, resolver_wallet, standard_order};

    #[tokio::test]
    async fn maker_signature_verifies() {
        let order = standard_order();
        let signed = order.sign(&maker_wallet()).await.unwrap();
        assert!(signed.verify().is_ok());
        assert_eq!(signed.order_hash(), order.src_order_hash());
    }

    #[tokio::test]
    async fn only_maker_may_sign() {
        let order = standard_order();
        let err = order.sign(&resolver_wallet()).await.unwrap_err();
        assert!(matches!(err, SwapError::Signing(_)));
    }

    #[tokio::test]
    async fn tampered_order_fails_verification() {
        let order = standard_order();
        let mut signed = order.sign(&maker_wallet()).await.unwrap();
        signed.order.taking_amount += ethers::types::U256::one();
        assert!(matches!(signed.verify(), Err(SwapError::Signing(_))));
    }

    #[tokio::test]
    async fn signature_is_chain_bound() {
        let order = standard_order();
        let signed = order.sign(&maker_wallet()).await.unwrap();
        let sig = signed.signature().unwrap();
        assert!(order.verify_signature(order.src_chain_id, &sig).is_ok());
        assert!(order.verify_signature(order.dst_chain_id, &sig).is_err());
    }

    #[tokio::test]
    async fn signed_order_survives_json() {
        let signed = standard_order().sign(&maker_wallet()).await.unwrap();
        let json = serde_json::to_string(&signed).unwrap();
        let back: SignedOrder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signed);
        assert!(back.verify().is_ok());
    }
}
