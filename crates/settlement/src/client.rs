use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use url::Url;

use crate::SettlementError;

/// RPC connection plus the settlement signing identity.
///
/// Connecting verifies the node's chain id against the configured one so a
/// misrouted RPC endpoint fails at startup instead of at the first
/// settlement.
pub struct ChainClient {
    pub provider: DynProvider,
    pub address: Address,
    pub chain_id: u64,
    pub contract: Address,
}

impl ChainClient {
    pub async fn connect(
        rpc_url: &str,
        private_key_hex: &str,
        chain_id: u64,
        contract: Address,
    ) -> Result<Self, SettlementError> {
        let signer: PrivateKeySigner = private_key_hex
            .trim_start_matches("0x")
            .parse()
            .map_err(|_| SettlementError::InvalidKey)?;
        let address = signer.address();

        let url: Url = rpc_url.parse()?;
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(url)
            .erased();

        let network_chain_id = provider
            .get_chain_id()
            .await
            .map_err(SettlementError::Rpc)?;
        if network_chain_id != chain_id {
            return Err(SettlementError::ChainIdMismatch {
                expected: chain_id,
                actual: network_chain_id,
            });
        }

        Ok(ChainClient {
            provider,
            address,
            chain_id,
            contract,
        })
    }
}
