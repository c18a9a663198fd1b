use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use common_types::{Order, OrderStatus, Side};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{corrupt, StoreError};

/// Durable order records. The store assigns ids and timestamps on create.
#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct OrderRow {
    id: String,
    maker: String,
    token_sell: String,
    token_buy: String,
    amount_sell: String,
    amount_buy: String,
    expiry: i64,
    nonce: i64,
    salt: String,
    signature: String,
    side: String,
    status: String,
    filled_base: String,
    pair: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderStore {
    pub fn new(pool: PgPool) -> Self {
        OrderStore { pool }
    }

    /// Insert a fresh order row, assigning its id and timestamps in place.
    pub async fn create(&self, order: &mut Order) -> Result<(), StoreError> {
        if order.id.is_empty() {
            order.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        order.created_at = now;
        order.updated_at = now;

        sqlx::query(
            r#"INSERT INTO orders
               (id, maker, token_sell, token_buy, amount_sell, amount_buy,
                expiry, nonce, salt, signature, side, status, filled_base, pair,
                created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"#,
        )
        .bind(&order.id)
        .bind(order.maker.to_string())
        .bind(order.token_sell.to_string())
        .bind(order.token_buy.to_string())
        .bind(order.amount_sell.to_string())
        .bind(order.amount_buy.to_string())
        .bind(order.expiry as i64)
        .bind(order.nonce as i64)
        .bind(order.salt.to_string())
        .bind(&order.signature)
        .bind(order.side.as_str())
        .bind(order.status.as_str())
        .bind(order.filled_base.to_string())
        .bind(&order.pair)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Order, StoreError> {
        let row: OrderRow = sqlx::query_as(r#"SELECT * FROM orders WHERE id = $1"#)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row_to_order(row)
    }

    pub async fn get_by_maker(&self, maker: &str) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> =
            sqlx::query_as(r#"SELECT * FROM orders WHERE maker = $1 ORDER BY created_at DESC"#)
                .bind(maker)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(row_to_order).collect()
    }

    /// All open or partially filled orders for a pair, oldest first, so that
    /// restart replay preserves time priority within a price level.
    pub async fn get_open_by_pair(&self, pair: &str) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            r#"SELECT * FROM orders
               WHERE pair = $1 AND status IN ('open', 'partially_filled')
               ORDER BY created_at ASC"#,
        )
        .bind(pair)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_order).collect()
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: OrderStatus,
        filled_base: U256,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE orders SET status = $1, filled_base = $2, updated_at = NOW() WHERE id = $3"#,
        )
        .bind(status.as_str())
        .bind(filled_base.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_order(row: OrderRow) -> Result<Order, StoreError> {
    let maker: Address = row
        .maker
        .parse()
        .map_err(|_| corrupt("maker", &row.maker))?;
    let token_sell: Address = row
        .token_sell
        .parse()
        .map_err(|_| corrupt("token_sell", &row.token_sell))?;
    let token_buy: Address = row
        .token_buy
        .parse()
        .map_err(|_| corrupt("token_buy", &row.token_buy))?;
    let amount_sell: U256 = row
        .amount_sell
        .parse()
        .map_err(|_| corrupt("amount_sell", &row.amount_sell))?;
    let amount_buy: U256 = row
        .amount_buy
        .parse()
        .map_err(|_| corrupt("amount_buy", &row.amount_buy))?;
    let salt: U256 = row.salt.parse().map_err(|_| corrupt("salt", &row.salt))?;
    let filled_base: U256 = row
        .filled_base
        .parse()
        .map_err(|_| corrupt("filled_base", &row.filled_base))?;
    let side = Side::parse(&row.side).ok_or_else(|| corrupt("side", &row.side))?;
    let status = OrderStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;

    Ok(Order {
        id: row.id,
        maker,
        token_sell,
        token_buy,
        amount_sell,
        amount_buy,
        expiry: row.expiry as u64,
        nonce: row.nonce as u64,
        salt,
        signature: row.signature,
        side,
        status,
        filled_base,
        pair: row.pair,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
