use alloy::primitives::{Address, U256, U512};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// --- Financial Primitives ---

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

fn u256_to_f64(v: U256) -> f64 {
    v.as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, &limb| acc * TWO_POW_64 + limb as f64)
}

/// Exact quote-per-base price as a ratio of token base units.
///
/// Comparison cross-multiplies in 512-bit space, so prices that are equal as
/// rationals compare equal even when their numerators and denominators
/// differ. The float projection is for display and aggregation payloads only;
/// it is never used as a sort key.
#[derive(Debug, Clone, Copy)]
pub struct Price {
    pub num: U256,
    pub den: U256,
}

impl Price {
    pub fn new(num: U256, den: U256) -> Self {
        Price { num, den }
    }

    pub fn approx_f64(&self) -> f64 {
        u256_to_f64(self.num) / u256_to_f64(self.den)
    }
}

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs: U512 = self.num.widening_mul(other.den);
        let rhs: U512 = other.num.widening_mul(self.den);
        lhs.cmp(&rhs)
    }
}

// --- Core State & Order Properties ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses admit no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(OrderStatus::Open),
            "partially_filled" => Some(OrderStatus::PartiallyFilled),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// A signed limit order. The id is assigned when the order is first
/// persisted; until then it is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub maker: Address,
    pub token_sell: Address,
    pub token_buy: Address,
    #[serde(with = "u256_decimal")]
    pub amount_sell: U256,
    #[serde(with = "u256_decimal")]
    pub amount_buy: U256,
    pub expiry: u64,
    pub nonce: u64,
    #[serde(with = "u256_decimal")]
    pub salt: U256,
    pub signature: String,
    pub side: Side,
    pub status: OrderStatus,
    #[serde(with = "u256_decimal")]
    pub filled_base: U256,
    pub pair: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Quote-per-base price. For a buy the maker spends `amount_sell` quote
    /// to receive `amount_buy` base; for a sell the other way around.
    pub fn price(&self) -> Price {
        match self.side {
            Side::Buy => Price::new(self.amount_sell, self.amount_buy),
            Side::Sell => Price::new(self.amount_buy, self.amount_sell),
        }
    }

    /// Total base-token size of the order.
    pub fn total_base(&self) -> U256 {
        match self.side {
            Side::Buy => self.amount_buy,
            Side::Sell => self.amount_sell,
        }
    }

    /// Base-token amount still unfilled.
    pub fn remaining_base(&self) -> U256 {
        self.total_base().saturating_sub(self.filled_base)
    }
}

/// JSON payload for submitting a new order. Amounts and salt arrive as
/// decimal strings of arbitrary length; addresses and the signature are
/// 0x-prefixed hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub maker: String,
    pub token_sell: String,
    pub token_buy: String,
    pub amount_sell: String,
    pub amount_buy: String,
    pub expiry: u64,
    pub nonce: u64,
    pub salt: String,
    pub signature: String,
    pub side: Side,
    pub pair: String,
}

/// A completed trade, derived from a match result. Only `settled_on_chain`
/// and `tx_hash` mutate after creation, each exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub buy_order_id: String,
    pub sell_order_id: String,
    pub buyer: Address,
    pub seller: Address,
    pub pair: String,
    #[serde(with = "u256_decimal")]
    pub base_amount: U256,
    #[serde(with = "u256_decimal")]
    pub quote_amount: U256,
    pub price: f64,
    pub tx_hash: String,
    pub settled_on_chain: bool,
    pub created_at: DateTime<Utc>,
}

/// A single match produced by the engine. `buy` and `sell` are post-fill
/// snapshots of the two orders involved; `price` is the maker's price.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub buy: Order,
    pub sell: Order,
    #[serde(with = "u256_decimal")]
    pub fill_amount: U256,
    #[serde(with = "u256_decimal")]
    pub quote_amount: U256,
    pub price: f64,
}

// --- Aggregated Book View ---

/// One aggregated price level: every resting order whose exact-ratio price
/// compares equal contributes to the same level.
#[derive(Debug, Clone, Serialize)]
pub struct PriceLevel {
    pub price: f64,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Serde adapter rendering U256 as decimal strings on the wire, preserving
/// precision past what a JSON number carries.
pub mod u256_decimal {
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<U256>().map_err(de::Error::custom)
    }
}
