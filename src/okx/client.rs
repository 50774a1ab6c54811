// =============================================================================
// OKX REST API Client — signed + public requests against the v5 API
// =============================================================================
//
// One `#[instrument]`-wrapped async method per endpoint, following the
// reference client's shape: build the request, send, check status, bail with
// status+body on failure, return a typed or `serde_json::Value` result.
// OKX wraps every response in `{code, msg, data: [...]}` regardless of
// success, so a non-"0" `code` is treated the same as a non-2xx status.
// =============================================================================

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::okx::auth::Credentials;
use crate::okx::rate_limit::RateLimitTracker;
use crate::okx::ws_types::RawCandle;
use crate::types::{AccountMode, MarginMode, PosSide};

const LIVE_BASE_URL: &str = "https://www.okx.com";

/// OKX REST client. One instance is shared across the collector and agent
/// binaries via `Arc`.
#[derive(Clone)]
pub struct OkxClient {
    creds: Credentials,
    base_url: String,
    demo: bool,
    client: reqwest::Client,
    rate_limit: std::sync::Arc<RateLimitTracker>,
}

impl OkxClient {
    pub fn new(creds: Credentials, mode: AccountMode) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            creds,
            base_url: LIVE_BASE_URL.to_string(),
            demo: matches!(mode, AccountMode::Demo),
            client,
            rate_limit: std::sync::Arc::new(RateLimitTracker::new()),
        }
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    // -------------------------------------------------------------------------
    // Signed request helper
    // -------------------------------------------------------------------------

    async fn signed_get(&self, path: &str) -> Result<serde_json::Value> {
        let headers = self.creds.headers("GET", path, "", self.demo);
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        self.decode(path, resp).await
    }

    async fn signed_post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let body_str = body.to_string();
        let headers = self.creds.headers("POST", path, &body_str, self.demo);
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body_str)
            .header("Content-Type", "application/json")
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;

        self.decode(path, resp).await
    }

    async fn decode(&self, path: &str, resp: reqwest::Response) -> Result<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response body for {path}"))?;

        let code = body["code"].as_str().unwrap_or("");
        if !status.is_success() || (!code.is_empty() && code != "0") {
            anyhow::bail!("OKX {path} returned status {status} code {code}: {body}");
        }

        Ok(body)
    }

    fn data_array<'a>(body: &'a serde_json::Value, path: &str) -> Result<&'a Vec<serde_json::Value>> {
        body["data"]
            .as_array()
            .with_context(|| format!("{path} response missing 'data' array"))
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v5/public/time — returns the server's current time in ms.
    #[instrument(skip(self), name = "okx::get_system_time")]
    pub async fn get_system_time(&self) -> Result<i64> {
        let url = format!("{}/api/v5/public/time", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v5/public/time request failed")?;
        let body = self.decode("/api/v5/public/time", resp).await?;
        let data = Self::data_array(&body, "/api/v5/public/time")?;
        let ts = data
            .first()
            .and_then(|v| v["ts"].as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .context("system time response missing 'ts'")?;
        Ok(ts)
    }

    /// GET /api/v5/public/instruments — contract value and minimum size.
    #[instrument(skip(self), name = "okx::get_instrument")]
    pub async fn get_instrument(&self, inst_id: &str) -> Result<serde_json::Value> {
        let url = format!(
            "{}/api/v5/public/instruments?instType=SWAP&instId={}",
            self.base_url, inst_id
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v5/public/instruments request failed")?;
        let body = self.decode("/api/v5/public/instruments", resp).await?;
        let data = Self::data_array(&body, "/api/v5/public/instruments")?;
        data.first()
            .cloned()
            .context("instrument not found")
    }

    /// GET /api/v5/market/history-candles — paginated by `after`/`before`.
    #[instrument(skip(self), name = "okx::get_history_candles")]
    pub async fn get_history_candles(
        &self,
        inst_id: &str,
        bar: &str,
        after: Option<i64>,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<RawCandle>> {
        let mut url = format!(
            "{}/api/v5/market/history-candles?instId={}&bar={}&limit={}",
            self.base_url, inst_id, bar, limit
        );
        if let Some(a) = after {
            url.push_str(&format!("&after={a}"));
        }
        if let Some(b) = before {
            url.push_str(&format!("&before={b}"));
        }

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v5/market/history-candles request failed")?;
        let body = self.decode("/api/v5/market/history-candles", resp).await?;
        let data = Self::data_array(&body, "/api/v5/market/history-candles")?;

        let mut candles = Vec::with_capacity(data.len());
        for entry in data {
            let arr = entry
                .as_array()
                .context("candle entry is not an array")?;
            if arr.len() < 9 {
                warn!(len = arr.len(), "skipping malformed candle entry");
                continue;
            }
            let field = |i: usize| arr[i].as_str().unwrap_or("0").to_string();
            candles.push((
                field(0),
                field(1),
                field(2),
                field(3),
                field(4),
                field(5),
                field(6),
                field(7),
                field(8),
            ));
        }
        debug!(inst_id, bar, count = candles.len(), "history candles fetched");
        Ok(candles)
    }

    /// GET /api/v5/public/funding-rate.
    #[instrument(skip(self), name = "okx::get_funding_rate")]
    pub async fn get_funding_rate(&self, inst_id: &str) -> Result<f64> {
        let url = format!(
            "{}/api/v5/public/funding-rate?instId={}",
            self.base_url, inst_id
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v5/public/funding-rate request failed")?;
        let body = self.decode("/api/v5/public/funding-rate", resp).await?;
        let data = Self::data_array(&body, "/api/v5/public/funding-rate")?;
        let rate = data
            .first()
            .and_then(|v| v["fundingRate"].as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok(rate)
    }

    /// GET /api/v5/public/open-interest — contract open interest.
    #[instrument(skip(self), name = "okx::get_open_interest")]
    pub async fn get_open_interest(&self, inst_id: &str) -> Result<f64> {
        let url = format!(
            "{}/api/v5/public/open-interest?instType=SWAP&instId={}",
            self.base_url, inst_id
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v5/public/open-interest request failed")?;
        let body = self.decode("/api/v5/public/open-interest", resp).await?;
        let data = Self::data_array(&body, "/api/v5/public/open-interest")?;
        let oi = data
            .first()
            .and_then(|v| v["oi"].as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok(oi)
    }

    /// GET /api/v5/rubik/stat/taker-volume — buy/sell taker volume ratio.
    #[instrument(skip(self), name = "okx::get_taker_volume")]
    pub async fn get_taker_volume(&self, ccy: &str) -> Result<(f64, f64)> {
        let url = format!(
            "{}/api/v5/rubik/stat/taker-volume?ccy={}&instType=CONTRACTS",
            self.base_url, ccy
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v5/rubik/stat/taker-volume request failed")?;
        let body = self.decode("/api/v5/rubik/stat/taker-volume", resp).await?;
        let data = Self::data_array(&body, "/api/v5/rubik/stat/taker-volume")?;
        let row = data.first().context("taker-volume response empty")?;
        let arr = row.as_array().context("taker-volume row is not an array")?;
        let sell: f64 = arr.get(1).and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let buy: f64 = arr.get(2).and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).unwrap_or(0.0);
        Ok((buy, sell))
    }

    // -------------------------------------------------------------------------
    // Account / positions
    // -------------------------------------------------------------------------

    /// POST /api/v5/account/set-leverage.
    #[instrument(skip(self), name = "okx::set_leverage")]
    pub async fn set_leverage(
        &self,
        inst_id: &str,
        leverage: f64,
        margin_mode: MarginMode,
        pos_side: Option<PosSide>,
    ) -> Result<()> {
        let mgn_mode = match margin_mode {
            MarginMode::Cross => "cross",
            MarginMode::Isolated => "isolated",
        };
        let mut body = serde_json::json!({
            "instId": inst_id,
            "lever": format!("{leverage}"),
            "mgnMode": mgn_mode,
        });
        if let Some(side) = pos_side {
            body["posSide"] = serde_json::Value::String(side.to_string());
        }
        self.signed_post("/api/v5/account/set-leverage", &body).await?;
        debug!(inst_id, leverage, "leverage set");
        Ok(())
    }

    /// GET /api/v5/account/balance — USDT available equity.
    #[instrument(skip(self), name = "okx::get_balance")]
    pub async fn get_balance(&self, ccy: &str) -> Result<f64> {
        let body = self
            .signed_get(&format!("/api/v5/account/balance?ccy={ccy}"))
            .await?;
        let data = Self::data_array(&body, "/api/v5/account/balance")?;
        let details = data
            .first()
            .and_then(|v| v["details"].as_array())
            .context("balance response missing 'details'")?;
        for d in details {
            if d["ccy"].as_str() == Some(ccy) {
                let avail = d["availEq"]
                    .as_str()
                    .unwrap_or("0")
                    .parse::<f64>()
                    .unwrap_or(0.0);
                return Ok(avail);
            }
        }
        warn!(ccy, "currency not found in balance details");
        Ok(0.0)
    }

    /// GET /api/v5/account/positions — open positions (size != 0 filtered by caller).
    #[instrument(skip(self), name = "okx::get_positions")]
    pub async fn get_positions(&self, inst_id: Option<&str>) -> Result<Vec<serde_json::Value>> {
        let path = match inst_id {
            Some(id) => format!("/api/v5/account/positions?instId={id}"),
            None => "/api/v5/account/positions".to_string(),
        };
        let body = self.signed_get(&path).await?;
        Ok(Self::data_array(&body, "/api/v5/account/positions")?.clone())
    }

    /// GET /api/v5/account/positions-history — closed positions (`cTime`/`uTime`).
    #[instrument(skip(self), name = "okx::get_positions_history")]
    pub async fn get_positions_history(&self, inst_id: Option<&str>) -> Result<Vec<serde_json::Value>> {
        let path = match inst_id {
            Some(id) => format!("/api/v5/account/positions-history?instId={id}"),
            None => "/api/v5/account/positions-history".to_string(),
        };
        let body = self.signed_get(&path).await?;
        Ok(Self::data_array(&body, "/api/v5/account/positions-history")?.clone())
    }

    /// GET /api/v5/trade/orders-pending — pending limit orders.
    #[instrument(skip(self), name = "okx::get_pending_orders")]
    pub async fn get_pending_orders(&self, inst_id: &str) -> Result<Vec<serde_json::Value>> {
        let path = format!("/api/v5/trade/orders-pending?instId={inst_id}&ordType=limit");
        let body = self.signed_get(&path).await?;
        Ok(Self::data_array(&body, "/api/v5/trade/orders-pending")?.clone())
    }

    /// GET /api/v5/trade/orders-algo-pending — pending conditional (SL) orders.
    #[instrument(skip(self), name = "okx::get_algo_orders")]
    pub async fn get_algo_orders(&self, inst_id: &str) -> Result<Vec<serde_json::Value>> {
        let path = format!(
            "/api/v5/trade/orders-algo-pending?instId={inst_id}&ordType=conditional"
        );
        let body = self.signed_get(&path).await?;
        Ok(Self::data_array(&body, "/api/v5/trade/orders-algo-pending")?.clone())
    }

    // -------------------------------------------------------------------------
    // Order placement / cancellation
    // -------------------------------------------------------------------------

    /// POST /api/v5/trade/order — market, limit, or reduce-only order.
    #[instrument(skip(self), name = "okx::place_order")]
    pub async fn place_order(
        &self,
        inst_id: &str,
        side: &str,
        pos_side: PosSide,
        ord_type: &str,
        size: f64,
        price: Option<f64>,
        reduce_only: bool,
    ) -> Result<String> {
        if !self.rate_limit.try_record_order() {
            anyhow::bail!("local order rate-limit exceeded");
        }

        let mut body = serde_json::json!({
            "instId": inst_id,
            "tdMode": "cross",
            "side": side,
            "posSide": pos_side.to_string(),
            "ordType": ord_type,
            "sz": format!("{size}"),
            "reduceOnly": reduce_only,
        });
        if let Some(p) = price {
            body["px"] = serde_json::Value::String(format!("{p}"));
        }

        let response = self.signed_post("/api/v5/trade/order", &body).await?;
        let data = Self::data_array(&response, "/api/v5/trade/order")?;
        let ord_id = data
            .first()
            .and_then(|v| v["ordId"].as_str())
            .context("place_order response missing ordId")?
            .to_string();

        debug!(inst_id, side, size, ord_id, "order placed");
        Ok(ord_id)
    }

    /// POST /api/v5/trade/order-algo — conditional stop-loss order.
    #[instrument(skip(self), name = "okx::place_algo_order")]
    pub async fn place_algo_order(
        &self,
        inst_id: &str,
        side: &str,
        pos_side: PosSide,
        size: f64,
        sl_trigger_px: f64,
    ) -> Result<String> {
        if !self.rate_limit.try_record_order() {
            anyhow::bail!("local order rate-limit exceeded");
        }

        let body = serde_json::json!({
            "instId": inst_id,
            "tdMode": "cross",
            "side": side,
            "posSide": pos_side.to_string(),
            "ordType": "conditional",
            "sz": format!("{size}"),
            "slTriggerPx": format!("{sl_trigger_px}"),
            "slOrdPx": "-1",
        });

        let response = self.signed_post("/api/v5/trade/order-algo", &body).await?;
        let data = Self::data_array(&response, "/api/v5/trade/order-algo")?;
        let algo_id = data
            .first()
            .and_then(|v| v["algoId"].as_str())
            .context("place_algo_order response missing algoId")?
            .to_string();

        debug!(inst_id, side, size, sl_trigger_px, algo_id, "algo order placed");
        Ok(algo_id)
    }

    /// POST /api/v5/trade/cancel-order.
    #[instrument(skip(self), name = "okx::cancel_order")]
    pub async fn cancel_order(&self, inst_id: &str, ord_id: &str) -> Result<()> {
        let body = serde_json::json!({ "instId": inst_id, "ordId": ord_id });
        self.signed_post("/api/v5/trade/cancel-order", &body).await?;
        debug!(inst_id, ord_id, "order cancelled");
        Ok(())
    }

    /// POST /api/v5/trade/cancel-algos — batch cancel of algo (conditional) orders.
    #[instrument(skip(self), name = "okx::cancel_algo_orders")]
    pub async fn cancel_algo_orders(&self, orders: &[(String, String)]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let body: Vec<serde_json::Value> = orders
            .iter()
            .map(|(algo_id, inst_id)| serde_json::json!({ "algoId": algo_id, "instId": inst_id }))
            .collect();
        self.signed_post("/api/v5/trade/cancel-algos", &serde_json::Value::Array(body))
            .await?;
        debug!(count = orders.len(), "algo orders cancelled");
        Ok(())
    }
}

impl std::fmt::Debug for OkxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxClient")
            .field("creds", &self.creds)
            .field("base_url", &self.base_url)
            .field("demo", &self.demo)
            .finish()
    }
}
