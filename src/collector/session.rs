// =============================================================================
// WebSocket sessions — public (book) and business (kline + trades) streams
// =============================================================================
//
// Each session owns one WebSocket connection, decodes inbound envelopes in
// the network task, and hands typed jobs to a small pool of worker tasks that
// apply them to the shared stores — the reconnect-after-5s loop mirrors the
// reference collector's `run_kline_stream`/`run_depth_stream` shape, split
// here into two channel groups (public vs business) because OKX serves books
// on one WS endpoint and candles/trades on another.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::market_data::orderbook::{BookAction, BookUpdate, LevelUpdate};
use crate::market_data::{KlineStore, OrderBookStore, TradeTape};
use crate::okx::ws_types::{BookData, RawCandle, TradeData, WsEnvelope};
use crate::time_sync::TimeSync;
use crate::types::{Trade, TradeSide};

const PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
const BUSINESS_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/business";

const BOOK_POOL_SIZE: usize = 10;
const KLINE_POOL_SIZE: usize = 10;
const TRADE_POOL_SIZE: usize = 16;
const QUEUE_CAPACITY: usize = 2048;

/// Shared handles a session dispatches decoded messages into.
pub struct CollectorHandles {
    pub books: Arc<OrderBookStore>,
    pub klines: Arc<KlineStore>,
    pub trades: Arc<TradeTape>,
    pub time_sync: Arc<TimeSync>,
}

struct BookJob {
    symbol: String,
    update: BookUpdate,
}

struct KlineJob {
    symbol: String,
    timeframe: String,
    raw: RawCandle,
}

struct TradeJob {
    trade: Trade,
}

fn spawn_pool<J, F>(size: usize, capacity: usize, apply: F) -> mpsc::Sender<J>
where
    J: Send + 'static,
    F: Fn(J) + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel::<J>(capacity);
    let rx = Arc::new(Mutex::new(rx));
    let apply = Arc::new(apply);
    for _ in 0..size {
        let rx = rx.clone();
        let apply = apply.clone();
        tokio::spawn(async move {
            loop {
                let job = { rx.lock().await.recv().await };
                match job {
                    Some(job) => apply(job),
                    None => break,
                }
            }
        });
    }
    tx
}

fn book_to_update(action: BookAction, data: &BookData, now_ms: i64) -> BookUpdate {
    let to_levels = |raw: &[(String, String, String, String)]| -> Vec<LevelUpdate> {
        raw.iter()
            .filter_map(|(p, s, _, _)| Some(LevelUpdate { price: p.parse().ok()?, size: s.parse().ok()? }))
            .collect()
    };
    BookUpdate {
        action,
        bids: to_levels(&data.bids),
        asks: to_levels(&data.asks),
        seq_id: data.seq_id,
        prev_seq_id: data.prev_seq_id,
        ts_ms: data.ts.parse().unwrap_or(now_ms),
    }
}

fn parse_trade(symbol: &str, data: &TradeData) -> Option<Trade> {
    Some(Trade {
        symbol: symbol.to_string(),
        trade_id: data.trade_id.clone(),
        ts_ms: data.ts.parse().ok()?,
        price: data.px.parse().ok()?,
        size: data.sz.parse().ok()?,
        side: match data.side.as_str() {
            "buy" => TradeSide::Buy,
            _ => TradeSide::Sell,
        },
    })
}

/// Run the *public* session (order book) for every symbol, reconnecting
/// forever with a 5s backoff. Returns only if `cancel` resolves.
pub async fn run_public_session(symbols: Vec<String>, handles: Arc<CollectorHandles>, mut cancel: tokio::sync::watch::Receiver<bool>) {
    let book_tx = spawn_pool(BOOK_POOL_SIZE, QUEUE_CAPACITY, {
        let books = handles.books.clone();
        move |job: BookJob| books.apply(&job.symbol, job.update)
    });

    loop {
        if *cancel.borrow() {
            return;
        }
        match run_public_once(&symbols, &handles, &book_tx, &mut cancel).await {
            Ok(()) => {
                info!("public session closed cleanly");
            }
            Err(e) => {
                warn!(error = %e, "public session error, reconnecting in 5s");
            }
        }
        if *cancel.borrow() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

async fn run_public_once(
    symbols: &[String],
    handles: &Arc<CollectorHandles>,
    book_tx: &mpsc::Sender<BookJob>,
    cancel: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    info!(url = PUBLIC_WS_URL, "connecting public WebSocket");
    let (ws, _resp) = connect_async(PUBLIC_WS_URL).await.context("public WS connect failed")?;
    let (mut write, mut read) = ws.split();

    let args: Vec<Value> = symbols
        .iter()
        .map(|s| serde_json::json!({"channel": "books", "instId": s}))
        .collect();
    let sub = serde_json::json!({"op": "subscribe", "args": args});
    write.send(Message::Text(sub.to_string())).await.context("book subscribe send failed")?;

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return Ok(());
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_public_message(&text, handles, book_tx).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "public WS read error");
                        anyhow::bail!("public WS read error: {e}");
                    }
                    None => {
                        warn!("public WS stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_public_message(text: &str, handles: &Arc<CollectorHandles>, book_tx: &mpsc::Sender<BookJob>) {
    let envelope: WsEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "failed to decode public envelope");
            return;
        }
    };
    if envelope.is_event() {
        return;
    }
    let Some(arg) = envelope.arg else { return };
    let Some(data) = envelope.data else { return };
    if arg.channel != "books" {
        return;
    }
    let action = match envelope.action.as_deref() {
        Some("snapshot") => BookAction::Snapshot,
        _ => BookAction::Update,
    };
    let now_ms = handles.time_sync.now_ms();
    let Ok(entries) = serde_json::from_value::<Vec<BookData>>(data) else { return };
    for entry in entries {
        let update = book_to_update(action, &entry, now_ms);
        let _ = book_tx.send(BookJob { symbol: arg.inst_id.clone(), update }).await;
    }
}

/// Run the *business* session (candles + all-trades) for every
/// (symbol, timeframe) pair, reconnecting forever with a 5s backoff.
pub async fn run_business_session(
    symbols: Vec<String>,
    timeframes: Vec<String>,
    handles: Arc<CollectorHandles>,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let kline_tx = spawn_pool(KLINE_POOL_SIZE, QUEUE_CAPACITY, {
        let klines = handles.klines.clone();
        move |job: KlineJob| {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if let Some(kline) = crate::market_data::kline_store::raw_to_kline(&job.symbol, &job.timeframe, &job.raw, now_ms) {
                klines.upsert(kline, now_ms);
            }
        }
    });
    let trade_tx = spawn_pool(TRADE_POOL_SIZE, QUEUE_CAPACITY, {
        let trades = handles.trades.clone();
        move |job: TradeJob| trades.push(job.trade, chrono::Utc::now().timestamp_millis())
    });

    loop {
        if *cancel.borrow() {
            return;
        }
        match run_business_once(&symbols, &timeframes, &handles, &kline_tx, &trade_tx, &mut cancel).await {
            Ok(()) => info!("business session closed cleanly"),
            Err(e) => warn!(error = %e, "business session error, reconnecting in 5s"),
        }
        if *cancel.borrow() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

async fn run_business_once(
    symbols: &[String],
    timeframes: &[String],
    handles: &Arc<CollectorHandles>,
    kline_tx: &mpsc::Sender<KlineJob>,
    trade_tx: &mpsc::Sender<TradeJob>,
    cancel: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    info!(url = BUSINESS_WS_URL, "connecting business WebSocket");
    let (ws, _resp) = connect_async(BUSINESS_WS_URL).await.context("business WS connect failed")?;
    let (mut write, mut read) = ws.split();

    let mut args: Vec<Value> = Vec::new();
    for symbol in symbols {
        for tf in timeframes {
            args.push(serde_json::json!({"channel": format!("candle{tf}"), "instId": symbol}));
        }
        args.push(serde_json::json!({"channel": "trades-all", "instId": symbol}));
    }
    let sub = serde_json::json!({"op": "subscribe", "args": args});
    write.send(Message::Text(sub.to_string())).await.context("business subscribe send failed")?;

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return Ok(());
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_business_message(&text, handles, kline_tx, trade_tx).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "business WS read error");
                        anyhow::bail!("business WS read error: {e}");
                    }
                    None => {
                        warn!("business WS stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_business_message(
    text: &str,
    handles: &Arc<CollectorHandles>,
    kline_tx: &mpsc::Sender<KlineJob>,
    trade_tx: &mpsc::Sender<TradeJob>,
) {
    let envelope: WsEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "failed to decode business envelope");
            return;
        }
    };
    if envelope.is_event() {
        return;
    }
    let Some(arg) = envelope.arg else { return };
    let Some(data) = envelope.data else { return };

    if let Some(timeframe) = arg.channel.strip_prefix("candle") {
        let Ok(raws) = serde_json::from_value::<Vec<RawCandle>>(data) else { return };
        for raw in raws {
            let _ = kline_tx
                .send(KlineJob { symbol: arg.inst_id.clone(), timeframe: timeframe.to_string(), raw })
                .await;
        }
        let _ = handles; // time_sync not needed for klines: exchange timestamp is authoritative
    } else if arg.channel == "trades-all" || arg.channel == "trades" {
        let Ok(entries) = serde_json::from_value::<Vec<TradeData>>(data) else { return };
        for entry in entries {
            if let Some(trade) = parse_trade(&arg.inst_id, &entry) {
                let _ = trade_tx.send(TradeJob { trade }).await;
            }
        }
    }
}
