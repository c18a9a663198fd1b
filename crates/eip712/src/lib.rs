//! EIP-712 typed-data hashing and order signature verification.
//!
//! Orders are signed off-chain against a fixed domain
//! (`NexusOrderBook`, version `1`) and verified here by recovering the
//! secp256k1 signer from the typed-data digest and comparing it to the
//! claimed maker. The byte layout must stay in lockstep with the on-chain
//! settlement contract's verification.
//!
use alloy::primitives::{keccak256, Address, Signature, B256, U256};
use thiserror::Error;

const DOMAIN_NAME: &str = "NexusOrderBook";
const DOMAIN_VERSION: &str = "1";

const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const ORDER_TYPE: &str =
    "Order(address maker,address tokenSell,address tokenBuy,uint256 amountSell,uint256 amountBuy,uint256 expiry,uint256 nonce,uint256 salt)";

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("invalid signature length: {0}")]
    InvalidLength(usize),
    #[error("signature recovery failed: {0}")]
    Recover(#[from] alloy::primitives::SignatureError),
}

/// Domain separator binding signatures to one deployment. The 32-byte
/// separator is computed once at construction.
#[derive(Debug, Clone)]
pub struct DomainSeparator {
    pub chain_id: U256,
    pub verifying_contract: Address,
    separator: B256,
}

impl DomainSeparator {
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        let chain_id = U256::from(chain_id);
        let mut buf = Vec::with_capacity(160);
        buf.extend_from_slice(keccak256(EIP712_DOMAIN_TYPE.as_bytes()).as_slice());
        buf.extend_from_slice(keccak256(DOMAIN_NAME.as_bytes()).as_slice());
        buf.extend_from_slice(keccak256(DOMAIN_VERSION.as_bytes()).as_slice());
        buf.extend_from_slice(B256::from(chain_id).as_slice());
        buf.extend_from_slice(verifying_contract.into_word().as_slice());
        DomainSeparator {
            chain_id,
            verifying_contract,
            separator: keccak256(&buf),
        }
    }

    pub fn hash(&self) -> B256 {
        self.separator
    }
}

/// The signed fields of an order, in type-string order. All integers are
/// 256-bit on the wire regardless of their in-memory width.
#[derive(Debug, Clone)]
pub struct OrderData {
    pub maker: Address,
    pub token_sell: Address,
    pub token_buy: Address,
    pub amount_sell: U256,
    pub amount_buy: U256,
    pub expiry: U256,
    pub nonce: U256,
    pub salt: U256,
}

/// keccak256 of the ABI-encoded order struct: the order type hash followed by
/// each field left-padded to 32 bytes.
pub fn hash_order(order: &OrderData) -> B256 {
    let mut buf = Vec::with_capacity(288);
    buf.extend_from_slice(keccak256(ORDER_TYPE.as_bytes()).as_slice());
    buf.extend_from_slice(order.maker.into_word().as_slice());
    buf.extend_from_slice(order.token_sell.into_word().as_slice());
    buf.extend_from_slice(order.token_buy.into_word().as_slice());
    buf.extend_from_slice(B256::from(order.amount_sell).as_slice());
    buf.extend_from_slice(B256::from(order.amount_buy).as_slice());
    buf.extend_from_slice(B256::from(order.expiry).as_slice());
    buf.extend_from_slice(B256::from(order.nonce).as_slice());
    buf.extend_from_slice(B256::from(order.salt).as_slice());
    keccak256(&buf)
}

/// Final signing digest: `keccak256(0x19 || 0x01 || domainSeparator || structHash)`.
pub fn hash_typed_data(domain_separator: B256, struct_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain_separator.as_slice());
    buf.extend_from_slice(struct_hash.as_slice());
    keccak256(&buf)
}

/// Recover the signer address from a digest and a 65-byte `r || s || v`
/// signature. Both the raw {0,1} and Ethereum {27,28} conventions for `v`
/// are accepted.
pub fn recover_signer(digest: B256, signature: &[u8]) -> Result<Address, SignatureError> {
    if signature.len() != 65 {
        return Err(SignatureError::InvalidLength(signature.len()));
    }
    let sig = Signature::from_raw(signature)?;
    Ok(sig.recover_address_from_prehash(&digest)?)
}

/// Verify that `signature` was produced by `order.maker` over the typed-data
/// digest of `order` under `domain`. A recoverable signature from the wrong
/// key yields `Ok(false)`; malformed input yields an error.
pub fn verify_order_signature(
    domain: &DomainSeparator,
    order: &OrderData,
    signature: &[u8],
) -> Result<bool, SignatureError> {
    let struct_hash = hash_order(order);
    let digest = hash_typed_data(domain.hash(), struct_hash);
    let recovered = recover_signer(digest, signature)?;
    Ok(recovered == order.maker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};

    fn test_domain() -> DomainSeparator {
        DomainSeparator::new(
            31337,
            address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
        )
    }

    fn test_order(maker: Address) -> OrderData {
        OrderData {
            maker,
            token_sell: address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            token_buy: address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            amount_sell: U256::from(1000u64),
            amount_buy: U256::from(500u64),
            expiry: U256::from(1_700_000_000u64),
            nonce: U256::ZERO,
            salt: U256::from(12345u64),
        }
    }

    fn sign_order(
        signer: &PrivateKeySigner,
        domain: &DomainSeparator,
        order: &OrderData,
    ) -> Vec<u8> {
        let digest = hash_typed_data(domain.hash(), hash_order(order));
        let sig = signer.sign_hash_sync(&digest).unwrap();
        sig.as_bytes().to_vec()
    }

    #[test]
    fn domain_type_hash_is_canonical() {
        // Well-known EIP712Domain type hash.
        assert_eq!(
            hex::encode(keccak256(EIP712_DOMAIN_TYPE.as_bytes())),
            "8b73c3c69bb8fe3d512ecc4cf759cc79239f7b179b0ffacaa9a75d522b39400f"
        );
    }

    #[test]
    fn hash_order_is_nonzero_and_field_sensitive() {
        let maker = address!("1234567890123456789012345678901234567890");
        let order = test_order(maker);
        let hash = hash_order(&order);
        assert_ne!(hash, B256::ZERO);

        let mut other = test_order(maker);
        other.salt = U256::from(12346u64);
        assert_ne!(hash_order(&other), hash);
    }

    #[test]
    fn verify_round_trip() {
        let signer = PrivateKeySigner::random();
        let domain = test_domain();
        let order = test_order(signer.address());
        let sig = sign_order(&signer, &domain, &order);

        assert!(verify_order_signature(&domain, &order, &sig).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_maker() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let domain = test_domain();
        // Claimed maker differs from the signing key.
        let order = test_order(other.address());
        let sig = sign_order(&signer, &domain, &order);

        assert!(!verify_order_signature(&domain, &order, &sig).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_domain() {
        let signer = PrivateKeySigner::random();
        let domain = test_domain();
        let order = test_order(signer.address());
        let sig = sign_order(&signer, &domain, &order);

        let other_domain = DomainSeparator::new(
            1,
            address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
        );
        assert!(!verify_order_signature(&other_domain, &order, &sig).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_order() {
        let signer = PrivateKeySigner::random();
        let domain = test_domain();
        let order = test_order(signer.address());
        let sig = sign_order(&signer, &domain, &order);

        let mut tampered = order.clone();
        tampered.amount_buy = U256::from(501u64);
        assert!(!verify_order_signature(&domain, &tampered, &sig).unwrap());
    }

    #[test]
    fn corrupted_signature_never_verifies() {
        let signer = PrivateKeySigner::random();
        let domain = test_domain();
        let order = test_order(signer.address());
        let mut sig = sign_order(&signer, &domain, &order);
        sig[10] ^= 0xff;

        // Either recovery fails outright or it yields a different address.
        match verify_order_signature(&domain, &order, &sig) {
            Ok(valid) => assert!(!valid),
            Err(SignatureError::Recover(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn bad_length_is_an_error() {
        let domain = test_domain();
        let order = test_order(address!("1234567890123456789012345678901234567890"));
        let err = verify_order_signature(&domain, &order, &[0u8; 64]).unwrap_err();
        assert!(matches!(err, SignatureError::InvalidLength(64)));
    }
}
