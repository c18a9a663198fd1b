//! Order lifecycle coordinator.
//!
//! Glues the per-pair matching engines to the durable stores, the snapshot
//! cache, and the settlement pipeline. The invariant it maintains: the book,
//! the database, and every downstream observer agree on the state of each
//! order, modulo the documented non-transactional window between a trade
//! insert and the corresponding order-status updates.
//!
use alloy::primitives::{Address, U256};
use chrono::Utc;
use common_types::{MatchResult, Order, OrderStatus, OrderSubmission, Snapshot, Trade};
use dashmap::DashMap;
use eip712::DomainSeparator;
use matching_engine::OrderBook;
use serde::Serialize;
use settlement::SettleJob;
use snapshot_cache::{OrderbookCache, PriceLevelData};
use std::sync::Arc;
use storage::{OrderStore, TradeStore};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum OrderServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("signature verification failed: {0}")]
    Signature(#[from] eip712::SignatureError),
    #[error("invalid signature: signer mismatch")]
    SignerMismatch,
    #[error("storage error: {0}")]
    Storage(#[from] storage::StoreError),
}

impl OrderServiceError {
    /// Client errors surface verbatim; everything else becomes a generic
    /// internal failure at the transport layer.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OrderServiceError::Validation(_)
                | OrderServiceError::Signature(_)
                | OrderServiceError::SignerMismatch
        )
    }
}

pub struct OrderService {
    orders: OrderStore,
    trades: TradeStore,
    cache: OrderbookCache,
    books: DashMap<String, Arc<OrderBook>>,
    domain: DomainSeparator,
    settle_tx: mpsc::Sender<SettleJob>,
}

#[derive(Serialize)]
struct OrderbookUpdate {
    #[serde(rename = "type")]
    kind: &'static str,
    bids: Vec<PriceLevelData>,
    asks: Vec<PriceLevelData>,
}

impl OrderService {
    pub fn new(
        orders: OrderStore,
        trades: TradeStore,
        cache: OrderbookCache,
        chain_id: u64,
        contract: Address,
        settle_tx: mpsc::Sender<SettleJob>,
    ) -> Self {
        OrderService {
            orders,
            trades,
            cache,
            books: DashMap::new(),
            domain: DomainSeparator::new(chain_id, contract),
            settle_tx,
        }
    }

    /// The book for a pair, created on first reference. Concurrent callers
    /// for the same pair observe a single instance.
    pub fn book(&self, pair: &str) -> Arc<OrderBook> {
        self.books
            .entry(pair.to_string())
            .or_insert_with(|| Arc::new(OrderBook::new(pair)))
            .clone()
    }

    /// Validate, verify, persist, match, and dispatch settlement for one
    /// submission. Returns the persisted order (post-match state) and the
    /// matches produced, in execution order.
    pub async fn submit_order(
        &self,
        sub: OrderSubmission,
    ) -> Result<(Order, Vec<MatchResult>), OrderServiceError> {
        let parsed = parse_submission(&sub)?;

        let valid = eip712::verify_order_signature(&self.domain, &parsed.typed, &parsed.signature)?;
        if !valid {
            return Err(OrderServiceError::SignerMismatch);
        }

        let now = Utc::now();
        let mut order = Order {
            id: String::new(),
            maker: parsed.typed.maker,
            token_sell: parsed.typed.token_sell,
            token_buy: parsed.typed.token_buy,
            amount_sell: parsed.typed.amount_sell,
            amount_buy: parsed.typed.amount_buy,
            expiry: sub.expiry,
            nonce: sub.nonce,
            salt: parsed.typed.salt,
            signature: sub.signature.clone(),
            side: sub.side,
            status: OrderStatus::Open,
            filled_base: U256::ZERO,
            pair: sub.pair.clone(),
            created_at: now,
            updated_at: now,
        };

        self.orders.create(&mut order).await?;

        let book = self.book(&order.pair);
        let (order, matches) = book.add_order(order);

        for m in &matches {
            self.process_match(m).await;
        }

        self.refresh_cache(&order.pair, &book).await;

        Ok((order, matches))
    }

    /// Persist one match as a trade, update both order rows, and hand the
    /// match to the settlement queue. Failures here are logged and skipped:
    /// the engine has already applied the fill in memory, and aborting the
    /// submission would desynchronize the book further.
    async fn process_match(&self, m: &MatchResult) {
        let mut trade = Trade {
            id: String::new(),
            buy_order_id: m.buy.id.clone(),
            sell_order_id: m.sell.id.clone(),
            buyer: m.buy.maker,
            seller: m.sell.maker,
            pair: m.buy.pair.clone(),
            base_amount: m.fill_amount,
            quote_amount: m.quote_amount,
            price: m.price,
            tx_hash: String::new(),
            settled_on_chain: false,
            created_at: Utc::now(),
        };

        if let Err(e) = self.trades.create(&mut trade).await {
            error!(error = %e, "failed to persist trade; skipping settlement dispatch");
            return;
        }

        if let Err(e) = self
            .orders
            .update_status(&m.buy.id, m.buy.status, m.buy.filled_base)
            .await
        {
            error!(order_id = %m.buy.id, error = %e, "failed to update buy order status");
        }
        if let Err(e) = self
            .orders
            .update_status(&m.sell.id, m.sell.status, m.sell.filled_base)
            .await
        {
            error!(order_id = %m.sell.id, error = %e, "failed to update sell order status");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = SettleJob {
            match_result: m.clone(),
            trade_id: trade.id.clone(),
            reply: reply_tx,
        };
        if self.settle_tx.send(job).await.is_err() {
            error!(trade_id = %trade.id, "settlement queue closed; trade left unsettled");
            return;
        }

        let trades = self.trades.clone();
        let trade_id = trade.id;
        tokio::spawn(async move {
            match reply_rx.await {
                Ok(Ok(tx_hash)) => match trades.mark_settled(&trade_id, &tx_hash).await {
                    Ok(()) => info!(trade_id = %trade_id, tx_hash = %tx_hash, "trade settled"),
                    Err(e) => {
                        error!(trade_id = %trade_id, error = %e, "failed to mark trade settled")
                    }
                },
                Ok(Err(e)) => error!(trade_id = %trade_id, error = %e, "settlement failed"),
                Err(_) => warn!(trade_id = %trade_id, "settlement reply dropped"),
            }
        });
    }

    /// Cancel by id. The book may no longer hold the order (it can fill in
    /// the window between the load and the cancel); the store update still
    /// records the cancellation either way.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), OrderServiceError> {
        let order = self.orders.get_by_id(order_id).await?;

        let book = self.book(&order.pair);
        let _ = book.cancel_order(order_id);

        self.orders
            .update_status(order_id, OrderStatus::Cancelled, order.filled_base)
            .await?;

        self.refresh_cache(&order.pair, &book).await;
        Ok(())
    }

    pub fn get_orderbook(&self, pair: &str) -> Snapshot {
        self.book(pair).snapshot()
    }

    pub async fn get_trades(&self, pair: &str, limit: i64) -> Result<Vec<Trade>, OrderServiceError> {
        let limit = if limit <= 0 { 50 } else { limit };
        Ok(self.trades.get_by_pair(pair, limit).await?)
    }

    /// Orders for one maker, newest first. The input address is parsed and
    /// re-rendered so any hex casing matches the checksummed form the store
    /// writes.
    pub async fn get_orders_by_maker(&self, maker: &str) -> Result<Vec<Order>, OrderServiceError> {
        let maker = parse_address(maker, "maker")?;
        Ok(self.orders.get_by_maker(&maker.to_string()).await?)
    }

    /// Rebuild a pair's in-memory book from the store at startup. Orders are
    /// replayed oldest-first so equal-price time priority survives the
    /// restart; any matches the replay produces are applied to the book only.
    pub async fn load_open_orders(&self, pair: &str) -> Result<usize, OrderServiceError> {
        let orders = self.orders.get_open_by_pair(pair).await?;
        let count = orders.len();
        let book = self.book(pair);
        for order in orders {
            book.add_order(order);
        }
        info!(pair = %pair, count, "loaded open orders");
        Ok(count)
    }

    async fn refresh_cache(&self, pair: &str, book: &OrderBook) {
        let snapshot = book.snapshot();
        let bids = to_level_data(&snapshot.bids);
        let asks = to_level_data(&snapshot.asks);

        if let Err(e) = self.cache.set_snapshot(pair, &bids, &asks).await {
            warn!(pair = %pair, error = %e, "failed to update snapshot cache");
        }

        let update = OrderbookUpdate {
            kind: "orderbook",
            bids,
            asks,
        };
        if let Err(e) = self.cache.publish_update(pair, &update).await {
            warn!(pair = %pair, error = %e, "failed to publish orderbook update");
        }
    }
}

fn to_level_data(levels: &[common_types::PriceLevel]) -> Vec<PriceLevelData> {
    levels
        .iter()
        .map(|level| PriceLevelData {
            price: level.price,
            amount: level.amount.to_string(),
            count: level.count,
        })
        .collect()
}

#[derive(Debug)]
struct ParsedSubmission {
    typed: eip712::OrderData,
    signature: Vec<u8>,
}

/// Pure validation step: decode every field of a submission or fail with a
/// short client-facing message. Runs before any state change.
fn parse_submission(sub: &OrderSubmission) -> Result<ParsedSubmission, OrderServiceError> {
    let maker = parse_address(&sub.maker, "maker")?;
    let token_sell = parse_address(&sub.token_sell, "tokenSell")?;
    let token_buy = parse_address(&sub.token_buy, "tokenBuy")?;
    let amount_sell = parse_positive_amount(&sub.amount_sell, "amountSell")?;
    let amount_buy = parse_positive_amount(&sub.amount_buy, "amountBuy")?;
    let salt: U256 = sub
        .salt
        .parse()
        .map_err(|_| OrderServiceError::Validation("invalid salt".to_string()))?;

    if sub.pair.trim().is_empty() {
        return Err(OrderServiceError::Validation("empty pair".to_string()));
    }

    let signature = hex::decode(sub.signature.trim_start_matches("0x"))
        .map_err(|_| OrderServiceError::Validation("invalid signature hex".to_string()))?;

    Ok(ParsedSubmission {
        typed: eip712::OrderData {
            maker,
            token_sell,
            token_buy,
            amount_sell,
            amount_buy,
            expiry: U256::from(sub.expiry),
            nonce: U256::from(sub.nonce),
            salt,
        },
        signature,
    })
}

fn parse_address(s: &str, field: &str) -> Result<Address, OrderServiceError> {
    s.parse()
        .map_err(|_| OrderServiceError::Validation(format!("invalid {field}")))
}

fn parse_positive_amount(s: &str, field: &str) -> Result<U256, OrderServiceError> {
    let amount: U256 = s
        .parse()
        .map_err(|_| OrderServiceError::Validation(format!("invalid {field}")))?;
    if amount.is_zero() {
        return Err(OrderServiceError::Validation(format!(
            "{field} must be positive"
        )));
    }
    Ok(amount)
}
