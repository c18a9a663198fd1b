//! On-chain settlement worker.
//!
//! A single-writer loop that turns match results into `settleMatch`
//! transactions from one signing key. All submissions are serialized under a
//! nonce lock, so the account's on-chain nonce sequence never interleaves.
//! Each job receives exactly one reply: the mined transaction hash, or the
//! first error encountered. The worker never retries and never drops a job.
//!
use alloy::network::TransactionBuilder;
use alloy::primitives::{Bytes, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use common_types::{MatchResult, Order};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{info, warn};

mod client;
pub use client::ChainClient;

/// Gas limit for every settleMatch submission.
const SETTLE_GAS_LIMIT: u64 = 500_000;

sol! {
    /// Order tuple exactly as the settlement contract declares it.
    struct SettleOrder {
        address maker;
        address tokenSell;
        address tokenBuy;
        uint256 amountSell;
        uint256 amountBuy;
        uint256 expiry;
        uint256 nonce;
        uint256 salt;
    }

    function settleMatch(
        SettleOrder buyOrder,
        bytes buySig,
        SettleOrder sellOrder,
        bytes sellSig,
        uint256 fillAmount
    );
}

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("invalid settlement private key")]
    InvalidKey,
    #[error("invalid rpc url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("rpc error: {0}")]
    Rpc(alloy::transports::TransportError),
    #[error("chain id mismatch: expected {expected}, got {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("nonce lookup failed: {0}")]
    Nonce(alloy::transports::TransportError),
    #[error("gas price lookup failed: {0}")]
    GasPrice(alloy::transports::TransportError),
    #[error("send failed: {0}")]
    Send(alloy::transports::TransportError),
    #[error("receipt wait failed: {0}")]
    Receipt(alloy::providers::PendingTransactionError),
    #[error("tx reverted: {0}")]
    Reverted(String),
    #[error("settlement cancelled")]
    Cancelled,
}

/// One reply per job: the mined tx hash, or the failure.
pub type SettleResult = Result<String, SettlementError>;

pub struct SettleJob {
    pub match_result: MatchResult,
    pub trade_id: String,
    pub reply: oneshot::Sender<SettleResult>,
}

/// Serialized submitter for one signing key.
pub struct SettlementWorker {
    client: ChainClient,
    nonce_lock: Mutex<()>,
}

impl SettlementWorker {
    pub fn new(client: ChainClient) -> Self {
        SettlementWorker {
            client,
            nonce_lock: Mutex::new(()),
        }
    }

    /// Consume jobs until the channel closes or shutdown fires. An in-flight
    /// job always produces its reply before the loop exits. Shutdown is
    /// re-checked by value at each job boundary: a notification consumed by
    /// an in-flight receipt wait must still stop the loop.
    pub async fn run(self, mut jobs: mpsc::Receiver<SettleJob>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let job = tokio::select! {
                _ = shutdown.changed() => break,
                job = jobs.recv() => job,
            };
            let Some(job) = job else {
                break;
            };

            let result = self.settle(&job.match_result, &mut shutdown).await;
            let cancelled = matches!(result, Err(SettlementError::Cancelled));
            if let Err(ref e) = result {
                warn!(trade_id = %job.trade_id, error = %e, "settlement failed");
            }
            if job.reply.send(result).is_err() {
                warn!(trade_id = %job.trade_id, "settlement reply receiver dropped");
            }
            if cancelled {
                break;
            }
        }
        info!("settlement worker stopped");
    }

    async fn settle(
        &self,
        match_result: &MatchResult,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SettleResult {
        // The lock spans nonce fetch through receipt wait: the account has a
        // single on-chain nonce counter.
        let _guard = self.nonce_lock.lock().await;

        let data = encode_settle_call(match_result)?;

        let nonce = self
            .client
            .provider
            .get_transaction_count(self.client.address)
            .pending()
            .await
            .map_err(SettlementError::Nonce)?;

        let gas_price = self
            .client
            .provider
            .get_gas_price()
            .await
            .map_err(SettlementError::GasPrice)?;

        let tx = TransactionRequest::default()
            .with_to(self.client.contract)
            .with_input(Bytes::from(data))
            .with_nonce(nonce)
            .with_gas_limit(SETTLE_GAS_LIMIT)
            .with_gas_price(gas_price)
            .with_chain_id(self.client.chain_id);

        let pending = self
            .client
            .provider
            .send_transaction(tx)
            .await
            .map_err(SettlementError::Send)?;
        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, "settlement tx sent");

        // The transaction is already on the wire; cancellation only abandons
        // the wait, it cannot revoke the submission.
        let receipt = tokio::select! {
            receipt = pending.get_receipt() => receipt.map_err(SettlementError::Receipt)?,
            _ = shutdown.changed() => return Err(SettlementError::Cancelled),
        };

        if !receipt.status() {
            return Err(SettlementError::Reverted(tx_hash.to_string()));
        }

        Ok(tx_hash.to_string())
    }
}

/// Stand-in worker for deployments without a configured signer: every job is
/// acknowledged immediately with a placeholder hash so the rest of the
/// pipeline behaves identically.
pub async fn run_stub(mut jobs: mpsc::Receiver<SettleJob>) {
    while let Some(job) = jobs.recv().await {
        let _ = job.reply.send(Ok(B256::ZERO.to_string()));
    }
    info!("stub settlement worker stopped");
}

fn encode_settle_call(match_result: &MatchResult) -> Result<Vec<u8>, SettlementError> {
    let buy_sig = decode_signature(&match_result.buy.signature)?;
    let sell_sig = decode_signature(&match_result.sell.signature)?;

    let call = settleMatchCall {
        buyOrder: to_settle_order(&match_result.buy),
        buySig: buy_sig.into(),
        sellOrder: to_settle_order(&match_result.sell),
        sellSig: sell_sig.into(),
        fillAmount: match_result.fill_amount,
    };
    Ok(call.abi_encode())
}

fn to_settle_order(order: &Order) -> SettleOrder {
    SettleOrder {
        maker: order.maker,
        tokenSell: order.token_sell,
        tokenBuy: order.token_buy,
        amountSell: order.amount_sell,
        amountBuy: order.amount_buy,
        expiry: U256::from(order.expiry),
        nonce: U256::from(order.nonce),
        salt: order.salt,
    }
}

fn decode_signature(signature: &str) -> Result<Vec<u8>, SettlementError> {
    hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| SettlementError::Encode(format!("bad signature hex: {e}")))
}
