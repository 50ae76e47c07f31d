// Typed structural hash of an order, EIP-712 shaped so a wallet can display
// what it signs and the same terms hash differently per chain, factory or
// protocol version.

use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

use super::Order;
use crate::data_structures::{whitelist_hash, ChainId};

pub const DOMAIN_NAME: &str = "Cross Chain Swap Escrow";
pub const DOMAIN_VERSION: &str = "1";

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

pub const ORDER_TYPE: &str = "Order(\
address maker,\
address receiver,\
address makerAsset,\
address takerAsset,\
uint256 makingAmount,\
uint256 takingAmount,\
uint256 srcChainId,\
uint256 dstChainId,\
uint256 srcSafetyDeposit,\
uint256 dstSafetyDeposit,\
bytes32 hashLock,\
uint256 timeLocks,\
bytes32 auction,\
bytes32 whitelist,\
uint256 resolvingStartTime,\
uint256 salt,\
uint256 nonce,\
bool allowPartialFills,\
bool allowMultipleFills)";

pub fn domain_separator(chain_id: ChainId, verifying_contract: Address) -> H256 {
    H256(keccak256(encode(&[
        Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_NAME).to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_VERSION).to_vec()),
        Token::Uint(U256::from(chain_id)),
        Token::Address(verifying_contract),
    ])))
}

impl Order {
    pub fn hash_struct(&self) -> H256 {
        H256(keccak256(encode(&[
            Token::FixedBytes(keccak256(ORDER_TYPE).to_vec()),
            Token::Address(self.maker),
            Token::Address(self.receiver),
            Token::Address(self.maker_asset),
            Token::Address(self.taker_asset),
            Token::Uint(self.making_amount),
            Token::Uint(self.taking_amount),
            Token::Uint(U256::from(self.src_chain_id)),
            Token::Uint(U256::from(self.dst_chain_id)),
            Token::Uint(self.src_safety_deposit),
            Token::Uint(self.dst_safety_deposit),
            Token::FixedBytes(self.hash_lock.value().as_bytes().to_vec()),
            // Not deployed yet: the deployment slot is zero.
            Token::Uint(self.time_locks.pack_offsets()),
            Token::FixedBytes(self.auction.hash().as_bytes().to_vec()),
            Token::FixedBytes(whitelist_hash(&self.resolver_whitelist).as_bytes().to_vec()),
            Token::Uint(U256::from(self.resolving_start_time)),
            Token::Uint(self.salt),
            Token::Uint(U256::from(self.nonce)),
            Token::Bool(self.allow_partial_fills),
            Token::Bool(self.allow_multiple_fills),
        ])))
    }

    /// Cross-system identifier of this order on `chain_id`.
    pub fn order_hash(&self, chain_id: ChainId) -> H256 {
        let mut buf = Vec::with_capacity(66);
        buf.extend_from_slice(&[0x19, 0x01]);
        buf.extend_from_slice(domain_separator(chain_id, self.escrow_factory).as_bytes());
        buf.extend_from_slice(self.hash_struct().as_bytes());
        H256(keccak256(buf))
    }

    /// Order hash on the source chain, where the maker signs and funds lock.
    pub fn src_order_hash(&self) -> H256 {
        self.order_hash(self.src_chain_id)
    }
}
