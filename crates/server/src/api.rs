use common_types::OrderSubmission;
use order_service::{OrderService, OrderServiceError};
use serde::Deserialize;
use snapshot_cache::OrderbookCache;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::error;
use warp::http::StatusCode;
use warp::{reply, Filter, Rejection, Reply};

use crate::ws;

const DEFAULT_PAIR: &str = "TKA-TKB";

#[derive(Deserialize)]
struct BookParams {
    pair: Option<String>,
}

#[derive(Deserialize)]
struct TradeParams {
    pair: Option<String>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct WsParams {
    pair: Option<String>,
}

pub fn routes(
    service: Arc<OrderService>,
    cache: OrderbookCache,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let svc = warp::any().map(move || service.clone());

    let submit = warp::post()
        .and(warp::path!("api" / "orders"))
        .and(svc.clone())
        .and(warp::body::json())
        .and_then(submit_order);

    let cancel = warp::delete()
        .and(warp::path!("api" / "orders" / String))
        .and(svc.clone())
        .and_then(cancel_order);

    let user_orders = warp::get()
        .and(warp::path!("api" / "orders" / String))
        .and(svc.clone())
        .and_then(get_user_orders);

    let orderbook = warp::get()
        .and(warp::path!("api" / "orderbook"))
        .and(warp::query::<BookParams>())
        .and(svc.clone())
        .and_then(get_orderbook);

    let trades = warp::get()
        .and(warp::path!("api" / "trades"))
        .and(warp::query::<TradeParams>())
        .and(svc)
        .and_then(get_trades);

    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(warp::query::<WsParams>())
        .and(warp::any().map(move || cache.clone()))
        .map(|upgrade: warp::ws::Ws, params: WsParams, cache: OrderbookCache| {
            let pair = params.pair.unwrap_or_else(|| DEFAULT_PAIR.to_string());
            upgrade.on_upgrade(move |socket| ws::client_connected(socket, pair, cache))
        });

    let health = warp::get()
        .and(warp::path("health"))
        .map(|| reply::json(&serde_json::json!({ "status": "ok" })));

    submit
        .or(cancel)
        .or(user_orders)
        .or(orderbook)
        .or(trades)
        .or(ws_route)
        .or(health)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allow_headers(vec!["content-type", "authorization"]),
        )
}

async fn submit_order(
    service: Arc<OrderService>,
    sub: OrderSubmission,
) -> Result<impl Reply, Infallible> {
    match service.submit_order(sub).await {
        Ok((order, matches)) => Ok(reply::with_status(
            reply::json(&serde_json::json!({
                "order": order,
                "matches": matches.len(),
            })),
            StatusCode::CREATED,
        )),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn cancel_order(id: String, service: Arc<OrderService>) -> Result<impl Reply, Infallible> {
    match service.cancel_order(&id).await {
        Ok(()) => Ok(reply::with_status(
            reply::json(&serde_json::json!({ "status": "cancelled" })),
            StatusCode::OK,
        )),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn get_user_orders(
    address: String,
    service: Arc<OrderService>,
) -> Result<impl Reply, Infallible> {
    match service.get_orders_by_maker(&address).await {
        Ok(orders) => Ok(reply::with_status(reply::json(&orders), StatusCode::OK)),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn get_orderbook(
    params: BookParams,
    service: Arc<OrderService>,
) -> Result<impl Reply, Infallible> {
    let pair = params.pair.unwrap_or_else(|| DEFAULT_PAIR.to_string());
    let snapshot = service.get_orderbook(&pair);
    Ok(reply::with_status(reply::json(&snapshot), StatusCode::OK))
}

async fn get_trades(
    params: TradeParams,
    service: Arc<OrderService>,
) -> Result<impl Reply, Infallible> {
    let pair = params.pair.unwrap_or_else(|| DEFAULT_PAIR.to_string());
    let limit = params.limit.unwrap_or(50);
    match service.get_trades(&pair, limit).await {
        Ok(trades) => Ok(reply::with_status(reply::json(&trades), StatusCode::OK)),
        Err(e) => Ok(error_reply(e)),
    }
}

fn error_reply(e: OrderServiceError) -> reply::WithStatus<reply::Json> {
    if e.is_client_error() {
        reply::with_status(
            reply::json(&serde_json::json!({ "error": e.to_string() })),
            StatusCode::BAD_REQUEST,
        )
    } else {
        error!(error = %e, "request failed");
        reply::with_status(
            reply::json(&serde_json::json!({ "error": "internal error" })),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }
}
