use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use common_types::Trade;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{corrupt, StoreError};

/// Durable trade records. After insert, only `settled_on_chain` and
/// `tx_hash` are ever updated.
#[derive(Clone)]
pub struct TradeStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct TradeRow {
    id: String,
    buy_order_id: String,
    sell_order_id: String,
    buyer: String,
    seller: String,
    pair: String,
    base_amount: String,
    quote_amount: String,
    price: f64,
    tx_hash: String,
    settled_on_chain: bool,
    created_at: DateTime<Utc>,
}

impl TradeStore {
    pub fn new(pool: PgPool) -> Self {
        TradeStore { pool }
    }

    pub async fn create(&self, trade: &mut Trade) -> Result<(), StoreError> {
        if trade.id.is_empty() {
            trade.id = Uuid::new_v4().to_string();
        }
        trade.created_at = Utc::now();

        sqlx::query(
            r#"INSERT INTO trades
               (id, buy_order_id, sell_order_id, buyer, seller, pair,
                base_amount, quote_amount, price, tx_hash, settled_on_chain, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(&trade.id)
        .bind(&trade.buy_order_id)
        .bind(&trade.sell_order_id)
        .bind(trade.buyer.to_string())
        .bind(trade.seller.to_string())
        .bind(&trade.pair)
        .bind(trade.base_amount.to_string())
        .bind(trade.quote_amount.to_string())
        .bind(trade.price)
        .bind(&trade.tx_hash)
        .bind(trade.settled_on_chain)
        .bind(trade.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_pair(&self, pair: &str, limit: i64) -> Result<Vec<Trade>, StoreError> {
        let rows: Vec<TradeRow> = sqlx::query_as(
            r#"SELECT * FROM trades WHERE pair = $1 ORDER BY created_at DESC LIMIT $2"#,
        )
        .bind(pair)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_trade).collect()
    }

    pub async fn mark_settled(&self, id: &str, tx_hash: &str) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE trades SET settled_on_chain = TRUE, tx_hash = $1 WHERE id = $2"#)
            .bind(tx_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Trades not yet settled on-chain, oldest first.
    pub async fn get_unsettled(&self) -> Result<Vec<Trade>, StoreError> {
        let rows: Vec<TradeRow> = sqlx::query_as(
            r#"SELECT * FROM trades WHERE settled_on_chain = FALSE ORDER BY created_at ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_trade).collect()
    }
}

fn row_to_trade(row: TradeRow) -> Result<Trade, StoreError> {
    let buyer: Address = row
        .buyer
        .parse()
        .map_err(|_| corrupt("buyer", &row.buyer))?;
    let seller: Address = row
        .seller
        .parse()
        .map_err(|_| corrupt("seller", &row.seller))?;
    let base_amount: U256 = row
        .base_amount
        .parse()
        .map_err(|_| corrupt("base_amount", &row.base_amount))?;
    let quote_amount: U256 = row
        .quote_amount
        .parse()
        .map_err(|_| corrupt("quote_amount", &row.quote_amount))?;

    Ok(Trade {
        id: row.id,
        buy_order_id: row.buy_order_id,
        sell_order_id: row.sell_order_id,
        buyer,
        seller,
        pair: row.pair,
        base_amount,
        quote_amount,
        price: row.price,
        tx_hash: row.tx_hash,
        settled_on_chain: row.settled_on_chain,
        created_at: row.created_at,
    })
}
