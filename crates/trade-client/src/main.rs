//! End-to-end API driver.
//!
//! Signs limit orders with two well-known development keys and walks the
//! happy path against a running server: rest two asks, cross one with a bid,
//! then print the book, trades, and the seller's orders. Useful as a smoke
//! test against a local stack (anvil + postgres + redis + server).
//!
use alloy::primitives::{Address, U256};
use alloy::signers::{local::PrivateKeySigner, SignerSync};
use anyhow::Context;
use clap::Parser;
use eip712::{DomainSeparator, OrderData};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value_t = String::from("http://127.0.0.1:8080"))]
    api_url: String,
    #[arg(long, default_value_t = String::from("0x5FbDB2315678afecb367f032d93F642f64180aa3"))]
    contract: String,
    #[arg(long, default_value_t = 31337)]
    chain_id: u64,
    #[arg(long, default_value_t = String::from("TKA-TKB"))]
    pair: String,
    #[arg(long, default_value_t = String::from("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"))]
    token_a: String,
    #[arg(long, default_value_t = String::from("0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0"))]
    token_b: String,
    /// Anvil default account 1.
    #[arg(long, default_value_t = String::from("59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"))]
    buyer_key: String,
    /// Anvil default account 2.
    #[arg(long, default_value_t = String::from("5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a"))]
    seller_key: String,
}

struct Client {
    http: reqwest::Client,
    api_url: String,
    pair: String,
}

impl Client {
    async fn submit_order(
        &self,
        order: &OrderData,
        signature: &str,
        side: &str,
    ) -> Result<serde_json::Value, anyhow::Error> {
        let body = serde_json::json!({
            "maker": order.maker.to_string(),
            "tokenSell": order.token_sell.to_string(),
            "tokenBuy": order.token_buy.to_string(),
            "amountSell": order.amount_sell.to_string(),
            "amountBuy": order.amount_buy.to_string(),
            "expiry": order.expiry.to::<u64>(),
            "nonce": order.nonce.to::<u64>(),
            "salt": order.salt.to_string(),
            "signature": signature,
            "side": side,
            "pair": self.pair,
        });
        let resp = self
            .http
            .post(format!("{}/api/orders", self.api_url))
            .json(&body)
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    async fn get_orderbook(&self) -> Result<serde_json::Value, anyhow::Error> {
        let resp = self
            .http
            .get(format!("{}/api/orderbook?pair={}", self.api_url, self.pair))
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    async fn get_trades(&self) -> Result<serde_json::Value, anyhow::Error> {
        let resp = self
            .http
            .get(format!("{}/api/trades?pair={}", self.api_url, self.pair))
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    async fn get_user_orders(&self, address: Address) -> Result<serde_json::Value, anyhow::Error> {
        let resp = self
            .http
            .get(format!("{}/api/orders/{}", self.api_url, address))
            .send()
            .await?;
        Ok(resp.json().await?)
    }
}

fn make_order(
    maker: Address,
    token_sell: Address,
    token_buy: Address,
    amount_sell: U256,
    amount_buy: U256,
    salt: u64,
) -> OrderData {
    let expiry = chrono::Utc::now().timestamp() as u64 + 3600;
    OrderData {
        maker,
        token_sell,
        token_buy,
        amount_sell,
        amount_buy,
        expiry: U256::from(expiry),
        nonce: U256::ZERO,
        salt: U256::from(salt),
    }
}

fn sign_order(
    order: &OrderData,
    signer: &PrivateKeySigner,
    domain: &DomainSeparator,
) -> Result<String, anyhow::Error> {
    let digest = eip712::hash_typed_data(domain.hash(), eip712::hash_order(order));
    let sig = signer.sign_hash_sync(&digest)?;
    Ok(format!("0x{}", hex::encode(sig.as_bytes())))
}

fn ether(units: u64) -> U256 {
    U256::from(units) * U256::from(10u64).pow(U256::from(18u64))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let buyer_key: PrivateKeySigner = args
        .buyer_key
        .trim_start_matches("0x")
        .parse()
        .context("invalid buyer key")?;
    let seller_key: PrivateKeySigner = args
        .seller_key
        .trim_start_matches("0x")
        .parse()
        .context("invalid seller key")?;
    let buyer = buyer_key.address();
    let seller = seller_key.address();

    let token_a: Address = args.token_a.parse().context("invalid token A address")?;
    let token_b: Address = args.token_b.parse().context("invalid token B address")?;
    let contract: Address = args.contract.parse().context("invalid contract address")?;
    let domain = DomainSeparator::new(args.chain_id, contract);

    info!(buyer = %buyer, seller = %seller, "trade client starting");

    let client = Client {
        http: reqwest::Client::new(),
        api_url: args.api_url,
        pair: args.pair,
    };

    // 1. Rest a sell: 50 TKA at 2 TKB/TKA.
    let sell = make_order(seller, token_a, token_b, ether(50), ether(100), 1);
    let sig = sign_order(&sell, &seller_key, &domain)?;
    let resp = client.submit_order(&sell, &sig, "sell").await?;
    info!(response = %resp, "submitted sell 50 @ 2.0");

    // 2. Rest a second sell at a worse price: 30 TKA at 2.5 TKB/TKA.
    let sell2 = make_order(seller, token_a, token_b, ether(30), ether(75), 2);
    let sig = sign_order(&sell2, &seller_key, &domain)?;
    let resp = client.submit_order(&sell2, &sig, "sell").await?;
    info!(response = %resp, "submitted sell 30 @ 2.5");

    let book = client.get_orderbook().await?;
    info!(bids = %book["bids"], asks = %book["asks"], "orderbook before cross");

    // 3. Cross with a buy: 50 TKA at 2 TKB/TKA fills the first ask.
    let buy = make_order(buyer, token_b, token_a, ether(100), ether(50), 1);
    let sig = sign_order(&buy, &buyer_key, &domain)?;
    let resp = client.submit_order(&buy, &sig, "buy").await?;
    info!(response = %resp, "submitted crossing buy 50 @ 2.0");

    let book = client.get_orderbook().await?;
    info!(bids = %book["bids"], asks = %book["asks"], "orderbook after cross");

    let trades = client.get_trades().await?;
    info!(trades = %trades, "recent trades");

    let orders = client.get_user_orders(seller).await?;
    info!(orders = %orders, "seller orders");

    Ok(())
}
