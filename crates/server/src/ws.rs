use futures_util::{SinkExt, StreamExt};
use snapshot_cache::OrderbookCache;
use std::time::Duration;
use tracing::{debug, error};
use warp::ws::{Message, WebSocket};

/// One websocket session: send the cached snapshot, then relay published
/// orderbook updates verbatim until the client goes away. A periodic ping
/// keeps intermediaries from reaping idle connections.
pub async fn client_connected(socket: WebSocket, pair: String, cache: OrderbookCache) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    match cache.get_snapshot(&pair).await {
        Ok((bids, asks)) => {
            let payload = serde_json::json!({
                "type": "snapshot",
                "bids": bids,
                "asks": asks,
            });
            if ws_tx.send(Message::text(payload.to_string())).await.is_err() {
                return;
            }
        }
        Err(e) => debug!(pair = %pair, error = %e, "no cached snapshot for new subscriber"),
    }

    let mut pubsub = match cache.subscribe(&pair).await {
        Ok(pubsub) => pubsub,
        Err(e) => {
            error!(pair = %pair, error = %e, "failed to subscribe to orderbook updates");
            return;
        }
    };
    let mut updates = pubsub.on_message();

    let mut ping = tokio::time::interval(Duration::from_secs(30));
    ping.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(update) = update else { break };
                let payload: String = match update.get_payload() {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                if ws_tx.send(Message::text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                // Read pump: the client closing or erroring ends the session.
                match incoming {
                    Some(Ok(msg)) if !msg.is_close() => continue,
                    _ => break,
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!(pair = %pair, "websocket client disconnected");
}
