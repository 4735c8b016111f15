//! BitMEX REST API client.

use crate::error::BitmexRestError;
use crate::requests::{
    to_compact_json, BulkCancelBody, BulkOrderBody, CancelBody, NewOrderBody,
};
use crate::responses::{total_fee, BucketRow, ExecutionRow, OrderRow};
use auth::{ApiCredentials, ExpiryClock, RequestSigner};
use common::BitmexEnvironment;
use execution_core::{CancelTarget, OrderRequest};
use model::{Candle, CandleInterval};
use rest_client::{Method, RestClient};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use url::form_urlencoded;

/// Request timeout for BitMEX API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime of a REST request signature.
const SIGNATURE_LIFETIME: Duration = Duration::from_secs(60);

const API_PREFIX: &str = "/api/v1";

/// Rows per page of `GET /trade/bucketed` (the exchange maximum).
pub const BUCKET_PAGE_SIZE: i64 = 1000;

/// Pause after this many pages.
pub const THROTTLE_EVERY_PAGES: usize = 3;

pub const THROTTLE_PAUSE: Duration = Duration::from_secs(5);

/// BitMEX REST API client with request signing.
pub struct BitmexRestClient {
    client: RestClient,
    credentials: ApiCredentials,
    environment: BitmexEnvironment,
    expiry: ExpiryClock,
}

impl BitmexRestClient {
    /// Create a client for the given environment.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        credentials: ApiCredentials,
        environment: BitmexEnvironment,
    ) -> Result<Self, BitmexRestError> {
        let client = RestClient::new(environment.rest_base_url(), REQUEST_TIMEOUT)?;

        Ok(Self {
            client,
            credentials,
            environment,
            expiry: ExpiryClock::new(),
        })
    }

    pub fn environment(&self) -> BitmexEnvironment {
        self.environment
    }

    pub fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }

    /// Next `api-expires` value for a signed request.
    ///
    /// The clock is private to REST signing; the websocket handshake uses
    /// its own, longer-lived expiry.
    pub fn request_expiry(&self) -> i64 {
        self.expiry.next(SIGNATURE_LIFETIME)
    }

    /// Send a signed request.
    ///
    /// `endpoint` is relative to `/api/v1`; the full path is what gets signed.
    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: Option<&str>,
        body: Option<String>,
    ) -> Result<T, BitmexRestError> {
        let path = format!("{}{}", API_PREFIX, endpoint);
        let expires = self.request_expiry();
        let signature = RequestSigner::new(&self.credentials).sign_request(
            method.as_str(),
            &path,
            query,
            expires,
            body.as_deref(),
        );
        let expires = expires.to_string();

        let headers = [
            ("api-expires", expires.as_str()),
            ("api-key", self.credentials.api_key()),
            ("api-signature", signature.as_str()),
        ];

        Ok(self
            .client
            .request(method, &path, query, &headers, body)
            .await?)
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Place a single order.
    ///
    /// POST /api/v1/order
    pub async fn place_order(
        &self,
        symbol: &str,
        request: &OrderRequest,
    ) -> Result<OrderRow, BitmexRestError> {
        let body = to_compact_json(&NewOrderBody::from_request(symbol, request)?)?;

        tracing::debug!(
            symbol = %symbol,
            client_order_id = %request.client_order_id,
            volume = %request.volume,
            price = ?request.price,
            "Placing order"
        );

        let row: OrderRow = self
            .signed_request(Method::POST, "/order", None, Some(body))
            .await?;

        tracing::info!(
            order_id = %row.order_id,
            client_order_id = %request.client_order_id,
            "Order placed"
        );

        Ok(row)
    }

    /// Place several orders in one request.
    ///
    /// POST /api/v1/order/bulk
    pub async fn place_orders(
        &self,
        symbol: &str,
        requests: &[OrderRequest],
    ) -> Result<Vec<OrderRow>, BitmexRestError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let orders = requests
            .iter()
            .map(|r| NewOrderBody::from_request(symbol, r))
            .collect::<Result<Vec<_>, _>>()?;
        let body = to_compact_json(&BulkOrderBody { orders })?;

        let rows: Vec<OrderRow> = self
            .signed_request(Method::POST, "/order/bulk", None, Some(body))
            .await?;

        tracing::info!(symbol = %symbol, count = rows.len(), "Bulk orders placed");
        Ok(rows)
    }

    /// Cancel one order by exchange id or client id.
    ///
    /// DELETE /api/v1/order
    pub async fn cancel(&self, target: &CancelTarget) -> Result<Vec<OrderRow>, BitmexRestError> {
        let body = to_compact_json(&CancelBody::from_target(target)?)?;

        let rows: Vec<OrderRow> = self
            .signed_request(Method::DELETE, "/order", None, Some(body))
            .await?;

        tracing::info!(target = ?target, "Order canceled");
        Ok(rows)
    }

    /// Cancel many orders by client id. An empty list makes no request.
    ///
    /// DELETE /api/v1/order
    pub async fn cancel_by_client_ids(
        &self,
        client_order_ids: &[String],
    ) -> Result<Vec<OrderRow>, BitmexRestError> {
        if client_order_ids.is_empty() {
            return Ok(Vec::new());
        }

        let body = to_compact_json(&BulkCancelBody {
            cl_ord_id: client_order_ids,
        })?;

        let rows: Vec<OrderRow> = self
            .signed_request(Method::DELETE, "/order", None, Some(body))
            .await?;

        tracing::info!(count = rows.len(), "Orders canceled");
        Ok(rows)
    }

    // ========================================================================
    // Executions
    // ========================================================================

    /// Executions belonging to one order.
    ///
    /// GET /api/v1/execution/tradeHistory
    pub async fn trade_history(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<Vec<ExecutionRow>, BitmexRestError> {
        let query = trade_history_query(symbol, order_id)?;
        self.signed_request(Method::GET, "/execution/tradeHistory", Some(&query), None)
            .await
    }

    /// Total fee paid for an order, in whole units of the settlement currency.
    pub async fn order_fee(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<(Decimal, Option<String>), BitmexRestError> {
        let executions = self.trade_history(symbol, order_id).await?;
        let (fee, asset) = total_fee(&executions);

        tracing::debug!(
            order_id = %order_id,
            executions = executions.len(),
            fee = %fee,
            "Fee computed from executions"
        );

        Ok((fee, asset))
    }

    // ========================================================================
    // Market Data
    // ========================================================================

    /// One page of bucketed trades starting at `start_ms`. Public endpoint.
    ///
    /// GET /api/v1/trade/bucketed
    pub async fn bucketed_page(
        &self,
        symbol: &str,
        interval: CandleInterval,
        start_ms: i64,
    ) -> Result<Vec<BucketRow>, BitmexRestError> {
        let query = bucketed_query(symbol, interval, start_ms)?;
        let path = format!("{}/trade/bucketed", API_PREFIX);

        Ok(self.client.get(&path, Some(&query), &[]).await?)
    }

    /// The last `count` candles in chronological order.
    ///
    /// Walks backward from now one page at a time, pausing after every
    /// third page. Stops early on an empty page.
    pub async fn historical_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        count: usize,
    ) -> Result<Vec<Candle>, BitmexRestError> {
        collect_candles(
            move |start_ms| self.bucketed_page(symbol, interval, start_ms),
            symbol,
            interval,
            count,
            common::now_ms(),
        )
        .await
    }
}

/// Page walk behind [`BitmexRestClient::historical_candles`].
///
/// `fetch_page` returns the bucket page starting at the given unix
/// millisecond.
pub async fn collect_candles<F, Fut>(
    mut fetch_page: F,
    symbol: &str,
    interval: CandleInterval,
    count: usize,
    now_ms: i64,
) -> Result<Vec<Candle>, BitmexRestError>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<Vec<BucketRow>, BitmexRestError>>,
{
    let pages_needed = (count as i64 + BUCKET_PAGE_SIZE - 1) / BUCKET_PAGE_SIZE;
    let mut pages: Vec<Vec<Candle>> = Vec::new();

    for page in 1..=pages_needed {
        let start_ms = page_start_time(now_ms, interval, page);
        let rows = fetch_page(start_ms).await?;

        tracing::debug!(
            symbol = %symbol,
            interval = %interval,
            page = page,
            rows = rows.len(),
            "Fetched candle page"
        );

        if rows.is_empty() {
            break;
        }

        pages.push(
            rows.iter()
                .filter_map(|row| row.to_candle(symbol, interval))
                .collect(),
        );

        if should_throttle(pages.len()) && page < pages_needed {
            tracing::debug!(pause_secs = THROTTLE_PAUSE.as_secs(), "Throttling candle fetch");
            tokio::time::sleep(THROTTLE_PAUSE).await;
        }
    }

    let mut candles: Vec<Candle> = pages.into_iter().rev().flatten().collect();
    candles.sort_by_key(|c| c.timestamp_ms);
    candles.dedup_by_key(|c| c.timestamp_ms);

    let skip = candles.len().saturating_sub(count);
    Ok(candles.split_off(skip))
}

impl std::fmt::Debug for BitmexRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmexRestClient")
            .field("environment", &self.environment)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Start time of page `page` (1-based), walking backward from `now_ms`.
pub fn page_start_time(now_ms: i64, interval: CandleInterval, page: i64) -> i64 {
    now_ms - page * BUCKET_PAGE_SIZE * interval.millis()
}

/// Whether to pause after `pages` pages have been fetched.
pub fn should_throttle(pages: usize) -> bool {
    pages > 0 && pages % THROTTLE_EVERY_PAGES == 0
}

fn trade_history_query(symbol: &str, order_id: &str) -> Result<String, BitmexRestError> {
    let filter = serde_json::to_string(&serde_json::json!({ "orderID": order_id }))
        .map_err(|e| BitmexRestError::Parse(e.to_string()))?;

    let mut query = form_urlencoded::Serializer::new(String::new());
    if !symbol.is_empty() {
        query.append_pair("symbol", symbol);
    }
    Ok(query.append_pair("filter", &filter).finish())
}

fn bucketed_query(
    symbol: &str,
    interval: CandleInterval,
    start_ms: i64,
) -> Result<String, BitmexRestError> {
    let start = chrono::DateTime::from_timestamp_millis(start_ms)
        .ok_or_else(|| BitmexRestError::InvalidRequest(format!("bad start time {}", start_ms)))?;

    Ok(form_urlencoded::Serializer::new(String::new())
        .append_pair("binSize", interval.as_str())
        .append_pair("symbol", symbol)
        .append_pair("startTime", &start.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .append_pair("count", &BUCKET_PAGE_SIZE.to_string())
        .finish())
}
