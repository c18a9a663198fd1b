//! Matching engine library.
//!
//! This crate implements price-time priority matching for signed limit
//! orders over a per-pair [`OrderBook`]. It is intentionally minimal and
//! free of networking or persistence concerns.
//!
//! Key properties
//! - Deterministic: given the same input sequence, produces the same matches
//! - Price-time priority: best price first; oldest-first within a price
//! - Execution always happens at the resting (maker) order's price
//! - Cancellation and snapshotting never tear an in-progress match
//!
use alloy::primitives::{U256, U512};
use common_types::{MatchResult, Order, OrderStatus, Price, PriceLevel, Side, Snapshot};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Order book for a single trading pair.
///
/// The by-id map owns the resting orders; each priority structure holds one
/// tree node per order, keyed by `(price, arrival sequence)`. The sequence
/// breaks equal-price ties oldest-first and doubles as the removal handle:
/// an entry records its own sequence, so cancellation recomputes the exact
/// key and removes a single node in logarithmic time.
pub struct OrderBook {
    pair: String,
    state: RwLock<BookState>,
}

/// A resting order plus the arrival sequence locating it in its side's tree.
struct OrderEntry {
    order: Order,
    seq: u64,
}

#[derive(Default)]
struct BookState {
    /// Best bid first: `Reverse` on the price keeps iteration descending
    /// while the sequence still orders equal prices oldest-first.
    bids: BTreeMap<(Reverse<Price>, u64), String>,
    /// Best ask first.
    asks: BTreeMap<(Price, u64), String>,
    orders: HashMap<String, OrderEntry>,
    next_seq: u64,
}

impl OrderBook {
    pub fn new(pair: impl Into<String>) -> Self {
        OrderBook {
            pair: pair.into(),
            state: RwLock::new(BookState::default()),
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    /// Match `order` against the opposite side, then rest any remainder.
    ///
    /// Returns the post-match state of the incoming order together with the
    /// matches produced, in execution order. Each match carries post-fill
    /// clones of both orders, so callers see the statuses and filled amounts
    /// as of that fill.
    pub fn add_order(&self, mut order: Order) -> (Order, Vec<MatchResult>) {
        let mut state = self.state.write().unwrap();

        let matches = match order.side {
            Side::Buy => match_buy(&mut state, &mut order),
            Side::Sell => match_sell(&mut state, &mut order),
        };

        if order.remaining_base() > U256::ZERO && order.status != OrderStatus::Filled {
            rest_order(&mut state, order.clone());
        }

        (order, matches)
    }

    /// Remove a resting order. Returns the cancelled order, or `None` if the
    /// book no longer holds it (unknown id, already filled, or already
    /// cancelled).
    pub fn cancel_order(&self, order_id: &str) -> Option<Order> {
        let mut state = self.state.write().unwrap();
        let entry = state.orders.remove(order_id)?;
        let mut order = entry.order;
        order.status = OrderStatus::Cancelled;

        let price = order.price();
        match order.side {
            Side::Buy => {
                state.bids.remove(&(Reverse(price), entry.seq));
            }
            Side::Sell => {
                state.asks.remove(&(price, entry.seq));
            }
        }

        Some(order)
    }

    /// Point-in-time aggregated view: one level per exact-ratio price, bids
    /// descending, asks ascending.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read().unwrap();
        let bids = aggregate_levels(
            state
                .bids
                .iter()
                .map(|(&(Reverse(price), _), id)| (price, id)),
            &state.orders,
        );
        let asks = aggregate_levels(
            state.asks.iter().map(|(&(price, _), id)| (price, id)),
            &state.orders,
        );
        Snapshot { bids, asks }
    }

    #[cfg(test)]
    fn resting_order(&self, order_id: &str) -> Option<Order> {
        self.state
            .read()
            .unwrap()
            .orders
            .get(order_id)
            .map(|entry| entry.order.clone())
    }

    #[cfg(test)]
    fn resting_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }
}

fn match_buy(state: &mut BookState, order: &mut Order) -> Vec<MatchResult> {
    let BookState { asks, orders, .. } = state;
    let mut matches = Vec::new();
    let buy_price = order.price();

    while order.remaining_base() > U256::ZERO {
        let Some(best) = asks.first_entry() else {
            break;
        };
        // Prices cross when the bid is at least the best ask.
        if buy_price < best.key().0 {
            break;
        }

        let maker_id = best.get().clone();
        let Some(maker_entry) = orders.get_mut(&maker_id) else {
            break;
        };
        let maker = &mut maker_entry.order;

        let fill = order.remaining_base().min(maker.remaining_base());
        if fill.is_zero() {
            break;
        }

        let quote = quote_at_maker_price(fill, maker);
        let price = maker.price().approx_f64();

        order.filled_base += fill;
        maker.filled_base += fill;
        refresh_status(order);
        refresh_status(maker);

        matches.push(MatchResult {
            buy: order.clone(),
            sell: maker.clone(),
            fill_amount: fill,
            quote_amount: quote,
            price,
        });

        if maker.status == OrderStatus::Filled {
            best.remove();
            orders.remove(&maker_id);
        }
    }

    matches
}

fn match_sell(state: &mut BookState, order: &mut Order) -> Vec<MatchResult> {
    let BookState { bids, orders, .. } = state;
    let mut matches = Vec::new();
    let sell_price = order.price();

    while order.remaining_base() > U256::ZERO {
        let Some(best) = bids.first_entry() else {
            break;
        };
        let Reverse(bid_price) = best.key().0;
        if bid_price < sell_price {
            break;
        }

        let maker_id = best.get().clone();
        let Some(maker_entry) = orders.get_mut(&maker_id) else {
            break;
        };
        let maker = &mut maker_entry.order;

        let fill = order.remaining_base().min(maker.remaining_base());
        if fill.is_zero() {
            break;
        }

        let quote = quote_at_maker_price(fill, maker);
        let price = maker.price().approx_f64();

        order.filled_base += fill;
        maker.filled_base += fill;
        refresh_status(order);
        refresh_status(maker);

        matches.push(MatchResult {
            buy: maker.clone(),
            sell: order.clone(),
            fill_amount: fill,
            quote_amount: quote,
            price,
        });

        if maker.status == OrderStatus::Filled {
            best.remove();
            orders.remove(&maker_id);
        }
    }

    matches
}

/// Quote-token amount exchanged for `fill` base units at the maker's ratio.
/// Integer division truncates toward zero; the rounding loss lands on the
/// taker's quote leg.
fn quote_at_maker_price(fill: U256, maker: &Order) -> U256 {
    let price = maker.price();
    let scaled: U512 = fill.widening_mul(price.num);
    let quote = scaled / price.den.to::<U512>();
    // Bounded by the maker's own quote-side amount, which is a U256.
    quote.to::<U256>()
}

fn refresh_status(order: &mut Order) {
    if order.remaining_base().is_zero() {
        order.status = OrderStatus::Filled;
    } else if order.filled_base > U256::ZERO {
        order.status = OrderStatus::PartiallyFilled;
    }
}

fn rest_order(state: &mut BookState, order: Order) {
    let seq = state.next_seq;
    state.next_seq += 1;

    let price = order.price();
    match order.side {
        Side::Buy => {
            state.bids.insert((Reverse(price), seq), order.id.clone());
        }
        Side::Sell => {
            state.asks.insert((price, seq), order.id.clone());
        }
    }
    state.orders.insert(order.id.clone(), OrderEntry { order, seq });
}

/// Collapse an ordered (price, id) walk into aggregated levels. Runs of
/// equal exact-ratio prices merge into one level, so equal reals from
/// different ratios never split.
fn aggregate_levels<'a>(
    ordered: impl Iterator<Item = (Price, &'a String)>,
    orders: &HashMap<String, OrderEntry>,
) -> Vec<PriceLevel> {
    let mut levels: Vec<(Price, PriceLevel)> = Vec::new();
    for (price, id) in ordered {
        let Some(entry) = orders.get(id) else {
            continue;
        };
        let remaining = entry.order.remaining_base();
        match levels.last_mut() {
            Some((level_price, level)) if *level_price == price => {
                level.amount += remaining;
                level.count += 1;
            }
            _ => levels.push((
                price,
                PriceLevel {
                    price: price.approx_f64(),
                    amount: remaining,
                    count: 1,
                },
            )),
        }
    }
    levels.into_iter().map(|(_, level)| level).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Address, U256};
    use chrono::Utc;
    use proptest::prelude::*;

    fn make_order(id: &str, maker: Address, side: Side, amount_sell: u64, amount_buy: u64) -> Order {
        Order {
            id: id.to_string(),
            maker,
            token_sell: address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            token_buy: address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            amount_sell: U256::from(amount_sell),
            amount_buy: U256::from(amount_buy),
            expiry: 1_700_000_000,
            nonce: 0,
            salt: U256::from(1),
            signature: String::new(),
            side,
            status: OrderStatus::Open,
            filled_base: U256::ZERO,
            pair: "TKA-TKB".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn buyer() -> Address {
        address!("1111111111111111111111111111111111111111")
    }

    fn seller() -> Address {
        address!("2222222222222222222222222222222222222222")
    }

    #[test]
    fn no_cross_rests_both_sides() {
        let book = OrderBook::new("TKA-TKB");

        // Sell 100 base for 300 quote (price 3).
        let (_, matches) = book.add_order(make_order("s1", seller(), Side::Sell, 100, 300));
        assert!(matches.is_empty());

        // Buy 100 base for 200 quote (price 2) does not reach the ask.
        let (_, matches) = book.add_order(make_order("b1", buyer(), Side::Buy, 200, 100));
        assert!(matches.is_empty());

        let snap = book.snapshot();
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.asks.len(), 1);
        assert_eq!(snap.bids[0].price, 2.0);
        assert_eq!(snap.bids[0].amount, U256::from(100u64));
        assert_eq!(snap.asks[0].price, 3.0);
        assert_eq!(snap.asks[0].amount, U256::from(100u64));
    }

    #[test]
    fn full_cross_executes_at_maker_price() {
        let book = OrderBook::new("TKA-TKB");

        // Resting sell: 100 base for 200 quote (price 2).
        book.add_order(make_order("s1", seller(), Side::Sell, 100, 200));

        // Taker buy at price 2.5 crosses and fills at the maker's 2.0.
        let (taker, matches) = book.add_order(make_order("b1", buyer(), Side::Buy, 250, 100));

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.fill_amount, U256::from(100u64));
        assert_eq!(m.quote_amount, U256::from(200u64));
        assert_eq!(m.price, 2.0);
        assert_eq!(m.sell.status, OrderStatus::Filled);
        assert_eq!(taker.status, OrderStatus::Filled);

        let snap = book.snapshot();
        assert!(snap.bids.is_empty());
        assert!(snap.asks.is_empty());
    }

    #[test]
    fn partial_taker_rests_remainder() {
        let book = OrderBook::new("TKA-TKB");

        // Resting sell: 50 base for 100 quote (price 2).
        book.add_order(make_order("s1", seller(), Side::Sell, 50, 100));

        // Buy 100 base at price 2: fills 50, rests 50.
        let (taker, matches) = book.add_order(make_order("b1", buyer(), Side::Buy, 200, 100));

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].fill_amount, U256::from(50u64));
        assert_eq!(matches[0].quote_amount, U256::from(100u64));
        assert_eq!(matches[0].sell.status, OrderStatus::Filled);
        assert_eq!(taker.status, OrderStatus::PartiallyFilled);
        assert_eq!(taker.remaining_base(), U256::from(50u64));

        let snap = book.snapshot();
        assert_eq!(snap.asks.len(), 0);
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.bids[0].price, 2.0);
        assert_eq!(snap.bids[0].amount, U256::from(50u64));
    }

    #[test]
    fn cancel_removes_order_and_reports_misses() {
        let book = OrderBook::new("TKA-TKB");
        book.add_order(make_order("b1", buyer(), Side::Buy, 200, 100));

        let cancelled = book.cancel_order("b1").unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let snap = book.snapshot();
        assert!(snap.bids.is_empty());

        assert!(book.cancel_order("b1").is_none());
        assert!(book.cancel_order("never-existed").is_none());
    }

    #[test]
    fn add_then_cancel_restores_snapshot() {
        let book = OrderBook::new("TKA-TKB");
        book.add_order(make_order("b1", buyer(), Side::Buy, 200, 100));
        book.add_order(make_order("s1", seller(), Side::Sell, 100, 300));
        let before = book.snapshot();

        book.add_order(make_order("b2", buyer(), Side::Buy, 400, 200));
        book.cancel_order("b2");

        let after = book.snapshot();
        assert_eq!(before.bids.len(), after.bids.len());
        assert_eq!(before.asks.len(), after.asks.len());
        for (b, a) in before.bids.iter().zip(after.bids.iter()) {
            assert_eq!(b.price, a.price);
            assert_eq!(b.amount, a.amount);
            assert_eq!(b.count, a.count);
        }
    }

    #[test]
    fn cancel_inside_a_shared_price_level_leaves_peers() {
        let book = OrderBook::new("TKA-TKB");

        // Three sells at the same price, arrival order s1, s2, s3.
        book.add_order(make_order("s1", seller(), Side::Sell, 50, 100));
        book.add_order(make_order("s2", seller(), Side::Sell, 50, 100));
        book.add_order(make_order("s3", seller(), Side::Sell, 50, 100));

        // Cancelling the middle one must not disturb its neighbors.
        assert!(book.cancel_order("s2").is_some());
        let snap = book.snapshot();
        assert_eq!(snap.asks.len(), 1);
        assert_eq!(snap.asks[0].count, 2);
        assert_eq!(snap.asks[0].amount, U256::from(100u64));

        // s1 is still first in time priority.
        let (_, matches) = book.add_order(make_order("b1", buyer(), Side::Buy, 100, 50));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].sell.id, "s1");
    }

    #[test]
    fn equal_price_orders_fill_oldest_first() {
        let book = OrderBook::new("TKA-TKB");

        // Two sells at price 2, s1 first.
        book.add_order(make_order("s1", seller(), Side::Sell, 50, 100));
        book.add_order(make_order("s2", seller(), Side::Sell, 50, 100));

        // Taker takes 50: only s1 fills.
        let (_, matches) = book.add_order(make_order("b1", buyer(), Side::Buy, 100, 50));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].sell.id, "s1");
        assert!(book.resting_order("s1").is_none());
        assert_eq!(
            book.resting_order("s2").unwrap().status,
            OrderStatus::Open
        );
    }

    #[test]
    fn taker_sweeps_multiple_levels_at_each_maker_price() {
        let book = OrderBook::new("TKA-TKB");

        book.add_order(make_order("s1", seller(), Side::Sell, 50, 100)); // price 2
        book.add_order(make_order("s2", seller(), Side::Sell, 50, 150)); // price 3

        // Buy 100 base at price 3 sweeps both, cheapest first.
        let (taker, matches) = book.add_order(make_order("b1", buyer(), Side::Buy, 300, 100));

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].sell.id, "s1");
        assert_eq!(matches[0].price, 2.0);
        assert_eq!(matches[0].quote_amount, U256::from(100u64));
        assert_eq!(matches[1].sell.id, "s2");
        assert_eq!(matches[1].price, 3.0);
        assert_eq!(matches[1].quote_amount, U256::from(150u64));
        assert_eq!(taker.status, OrderStatus::Filled);
    }

    #[test]
    fn quote_amount_rounds_toward_zero() {
        let book = OrderBook::new("TKA-TKB");

        // Maker sell: 3 base for 10 quote (price 10/3).
        book.add_order(make_order("s1", seller(), Side::Sell, 3, 10));

        // Taker buys 1 base at a generous limit: quote = 1 * 10 / 3 = 3.
        let (_, matches) = book.add_order(make_order("b1", buyer(), Side::Buy, 10, 1));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].fill_amount, U256::from(1u64));
        assert_eq!(matches[0].quote_amount, U256::from(3u64));
    }

    #[test]
    fn equal_ratio_prices_share_one_level() {
        let book = OrderBook::new("TKA-TKB");

        // 200/100 and 100/50 are both exactly price 2.
        book.add_order(make_order("b1", buyer(), Side::Buy, 200, 100));
        book.add_order(make_order("b2", buyer(), Side::Buy, 100, 50));

        let snap = book.snapshot();
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.bids[0].count, 2);
        assert_eq!(snap.bids[0].amount, U256::from(150u64));
    }

    #[test]
    fn partial_fill_keeps_maker_priority() {
        let book = OrderBook::new("TKA-TKB");

        book.add_order(make_order("s1", seller(), Side::Sell, 100, 200)); // price 2
        book.add_order(make_order("s2", seller(), Side::Sell, 100, 200)); // price 2

        // Take 40 of s1; s1 stays in front of s2.
        book.add_order(make_order("b1", buyer(), Side::Buy, 80, 40));
        let s1 = book.resting_order("s1").unwrap();
        assert_eq!(s1.status, OrderStatus::PartiallyFilled);
        assert_eq!(s1.remaining_base(), U256::from(60u64));

        // Next taker still hits s1 first.
        let (_, matches) = book.add_order(make_order("b2", buyer(), Side::Buy, 120, 60));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].sell.id, "s1");
        assert_eq!(matches[0].sell.status, OrderStatus::Filled);
    }

    // --- Property-based invariants over random order flow ---

    #[derive(Debug, Clone)]
    enum Op {
        Add {
            side: Side,
            amount_sell: u64,
            amount_buy: u64,
        },
        Cancel(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (any::<bool>(), 1u64..500, 1u64..500).prop_map(|(buy, amount_sell, amount_buy)| {
                Op::Add {
                    side: if buy { Side::Buy } else { Side::Sell },
                    amount_sell,
                    amount_buy,
                }
            }),
            1 => (0usize..64).prop_map(Op::Cancel),
        ]
    }

    proptest! {
        #[test]
        fn random_flow_preserves_book_invariants(ops in proptest::collection::vec(op_strategy(), 1..80)) {
            let book = OrderBook::new("TKA-TKB");
            let mut submitted: Vec<String> = Vec::new();
            let mut totals: HashMap<String, U256> = HashMap::new();
            let mut filled: HashMap<String, U256> = HashMap::new();

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Add { side, amount_sell, amount_buy } => {
                        let id = format!("o{i}");
                        let order = make_order(&id, buyer(), side, amount_sell, amount_buy);
                        totals.insert(id.clone(), order.total_base());
                        let maker_side = match side {
                            Side::Buy => Side::Sell,
                            Side::Sell => Side::Buy,
                        };

                        let (placed, matches) = book.add_order(order);
                        submitted.push(id.clone());

                        for m in &matches {
                            // Every fill moves a strictly positive base amount.
                            prop_assert!(m.fill_amount > U256::ZERO);

                            let maker = match maker_side {
                                Side::Sell => &m.sell,
                                Side::Buy => &m.buy,
                            };
                            // Execution price is the maker's price.
                            prop_assert!((m.price - maker.price().approx_f64()).abs() < 1e-9);

                            // No order ever fills past its size.
                            prop_assert!(m.buy.filled_base <= m.buy.total_base());
                            prop_assert!(m.sell.filled_base <= m.sell.total_base());

                            *filled.entry(m.buy.id.clone()).or_insert(U256::ZERO) += m.fill_amount;
                            *filled.entry(m.sell.id.clone()).or_insert(U256::ZERO) += m.fill_amount;
                        }

                        prop_assert!(placed.filled_base <= placed.total_base());
                    }
                    Op::Cancel(pick) => {
                        if !submitted.is_empty() {
                            let id = submitted[pick % submitted.len()].clone();
                            if let Some(cancelled) = book.cancel_order(&id) {
                                prop_assert_eq!(cancelled.status, OrderStatus::Cancelled);
                            }
                        }
                    }
                }

                // Cumulative fills never exceed an order's total size.
                for (id, total) in &totals {
                    if let Some(f) = filled.get(id) {
                        prop_assert!(f <= total);
                    }
                }

                // Nothing resting is filled, and the sides stay sorted.
                let snap = book.snapshot();
                for level in snap.bids.windows(2) {
                    prop_assert!(level[0].price >= level[1].price);
                }
                for level in snap.asks.windows(2) {
                    prop_assert!(level[0].price <= level[1].price);
                }
                if let (Some(best_bid), Some(best_ask)) = (snap.bids.first(), snap.asks.first()) {
                    // A crossed book would mean a missed match.
                    prop_assert!(best_bid.price <= best_ask.price);
                }
                for level in snap.bids.iter().chain(snap.asks.iter()) {
                    prop_assert!(level.amount > U256::ZERO);
                    prop_assert!(level.count > 0);
                }
            }

            // Resting orders are never in a terminal filled state.
            for id in &submitted {
                if let Some(resting) = book.resting_order(id) {
                    prop_assert!(resting.status != OrderStatus::Filled);
                    prop_assert!(resting.remaining_base() > U256::ZERO);
                }
            }
            let _ = book.resting_count();
        }
    }
}
