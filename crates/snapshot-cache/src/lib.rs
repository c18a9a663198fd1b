//! Redis-backed orderbook snapshot cache and pub/sub fan-out.
//!
//! The cache holds the latest aggregated snapshot per pair under
//! `ob:{pair}:bids` / `ob:{pair}:asks` and broadcasts update payloads on
//! `ob:updates:{pair}`. It is best-effort: the in-memory book plus the
//! durable order store remain the source of truth, so a write failure here is
//! survivable.
//!
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cached wire form of one aggregated price level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevelData {
    pub price: f64,
    pub amount: String,
    pub count: usize,
}

#[derive(Clone)]
pub struct OrderbookCache {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
}

impl OrderbookCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(OrderbookCache { client, conn })
    }

    /// Store both sides of a pair's snapshot in a single pipelined write.
    pub async fn set_snapshot(
        &self,
        pair: &str,
        bids: &[PriceLevelData],
        asks: &[PriceLevelData],
    ) -> Result<(), CacheError> {
        let bids_json = serde_json::to_vec(bids)?;
        let asks_json = serde_json::to_vec(asks)?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .set(format!("ob:{pair}:bids"), bids_json)
            .set(format!("ob:{pair}:asks"), asks_json)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Read the cached snapshot. Missing keys read as empty sides.
    pub async fn get_snapshot(
        &self,
        pair: &str,
    ) -> Result<(Vec<PriceLevelData>, Vec<PriceLevelData>), CacheError> {
        let mut conn = self.conn.clone();
        let bids_json: Option<Vec<u8>> = conn.get(format!("ob:{pair}:bids")).await?;
        let asks_json: Option<Vec<u8>> = conn.get(format!("ob:{pair}:asks")).await?;

        let bids = match bids_json {
            Some(raw) if !raw.is_empty() => serde_json::from_slice(&raw)?,
            _ => Vec::new(),
        };
        let asks = match asks_json {
            Some(raw) if !raw.is_empty() => serde_json::from_slice(&raw)?,
            _ => Vec::new(),
        };
        Ok((bids, asks))
    }

    /// Broadcast an update payload to subscribers of `ob:updates:{pair}`.
    pub async fn publish_update<T: Serialize>(
        &self,
        pair: &str,
        payload: &T,
    ) -> Result<(), CacheError> {
        let msg = serde_json::to_vec(payload)?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(format!("ob:updates:{pair}"), msg).await?;
        Ok(())
    }

    /// Open a dedicated pub/sub connection subscribed to a pair's update
    /// channel. Subscribers receive published payloads verbatim and handle
    /// reconnection themselves.
    pub async fn subscribe(&self, pair: &str) -> Result<redis::aio::PubSub, CacheError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(format!("ob:updates:{pair}")).await?;
        Ok(pubsub)
    }
}
