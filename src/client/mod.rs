//! Client facade
//!
//! One method per endpoint family. Every call needs an established
//! connection: without one it does nothing and returns `None`. Wire
//! failures are logged and come back as a failed `ApiResult`.

mod params;

pub use params::{
    normalize_symbol, AdjustKind, Category, Cycle, KlineQuery, Market, ReportType, StockQuery,
    TransListQuery,
};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{Connection, Mode};
use crate::error::Result;
use crate::params;
use crate::protocol::api::actions;
use crate::protocol::{ApiResult, Subscription};

/// Application-facing market data client
#[derive(Debug, Clone)]
pub struct Dataser {
    conn: Connection,
}

impl Dataser {
    /// Build an unconnected client
    pub fn new(config: Config, mode: Mode) -> Result<Self> {
        Ok(Self {
            conn: Connection::new(config, mode)?,
        })
    }

    /// Wrap an existing connection
    pub fn with_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Connect in synchronous mode
    pub async fn connect(config: Config) -> Result<Self> {
        let dataser = Self::new(config, Mode::Sync)?;
        dataser.conn.connect().await?;
        Ok(dataser)
    }

    /// Connect in subscription mode: heartbeat sent, receive loop running
    pub async fn connect_async(config: Config) -> Result<Self> {
        let dataser = Self::new(config, Mode::Async)?;
        dataser.conn.connect().await?;
        Ok(dataser)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Register `email` with the server. On success the server mails the
    /// application id and secret used for login.
    pub async fn register_account(config: Config, email: &str, find_app: bool) -> ApiResult {
        let dataser = match Self::new(config, Mode::Sync) {
            Ok(dataser) => dataser,
            Err(e) => return ApiResult::failure(e.to_string()),
        };

        if let Err(e) = dataser.conn.connect_without_login().await {
            warn!(error = %e, "Registration connect failed");
            return ApiResult::failure(format!("registration failed: {}", e));
        }

        let result = dataser
            .register(email, find_app)
            .await
            .unwrap_or_else(|| ApiResult::failure("registration failed"));
        dataser.close().await;
        result
    }

    pub async fn register(&self, email: &str, find_app: bool) -> Option<ApiResult> {
        self.call(
            actions::REGISTER,
            params! { "email" => email, "findapp" => find_app },
        )
        .await
    }

    /// Send one heartbeat; false if not connected or the send failed
    pub async fn heartbeat(&self) -> bool {
        if !self.conn.is_connected() {
            return false;
        }
        match self.conn.heartbeat().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Heartbeat failed");
                false
            }
        }
    }

    pub async fn get_category(&self, category: Category) -> Option<ApiResult> {
        self.call(actions::CATEGORY, params! { "category_id" => category.id() })
            .await
    }

    pub async fn get_industries(&self) -> Option<ApiResult> {
        self.get_category(Category::Industry).await
    }

    pub async fn get_concepts(&self) -> Option<ApiResult> {
        self.get_category(Category::Concept).await
    }

    pub async fn get_regions(&self) -> Option<ApiResult> {
        self.get_category(Category::Region).await
    }

    /// Security details; an empty query lists the market
    pub async fn get_stocks(&self, query: StockQuery) -> Option<ApiResult> {
        self.call(actions::STOCKS, query.params()).await
    }

    /// Real-time quotes, one shot
    pub async fn get_quotes<S: AsRef<str>>(&self, symbols: &[S]) -> Option<ApiResult> {
        self.call(actions::QUOTES, quote_params(symbols)).await
    }

    /// Subscribe to real-time quotes; the server keeps pushing until cancelled
    pub async fn sub_quotes<S, F>(&self, symbols: &[S], callback: F) -> Option<Subscription>
    where
        S: AsRef<str>,
        F: Fn(&ApiResult) + Send + Sync + 'static,
    {
        self.subscribe(actions::QUOTES, quote_params(symbols), callback)
            .await
    }

    /// Subscribe to quotes for the whole market
    pub async fn sub_all_quotes<F>(&self, callback: F) -> Option<Subscription>
    where
        F: Fn(&ApiResult) + Send + Sync + 'static,
    {
        self.subscribe(actions::ALL_QUOTES, Map::new(), callback)
            .await
    }

    /// History bars
    pub async fn get_klines(&self, query: KlineQuery) -> Option<ApiResult> {
        self.call(actions::KLINES, query.params()).await
    }

    /// Financial report; `report_date` (`%Y-%m-%d`) defaults to the latest
    pub async fn get_finance(
        &self,
        symbol: &str,
        market: Market,
        report_type: ReportType,
        report_date: Option<&str>,
    ) -> Option<ApiResult> {
        let (symbol, market) = normalize_symbol(symbol, market);
        self.call(
            actions::FINANCE,
            params! {
                "symbol" => symbol,
                "market" => market.code(),
                "report_type" => report_type.as_str(),
                "report_date" => report_date.unwrap_or_default(),
            },
        )
        .await
    }

    /// Dividend and bonus-share history between optional dates
    pub async fn get_sharebonus(
        &self,
        symbol: &str,
        market: Market,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Option<ApiResult> {
        let (symbol, market) = normalize_symbol(symbol, market);
        self.call(
            actions::SHARE_BONUS,
            params! {
                "symbol" => symbol,
                "market" => market.code(),
                "start" => start,
                "end" => end,
            },
        )
        .await
    }

    /// Price adjustment factors
    pub async fn get_factors(&self, symbol: &str, market: Market) -> Option<ApiResult> {
        self.call(actions::FACTORS, symbol_params(symbol, market))
            .await
    }

    /// Intraday time-sharing line, one shot
    pub async fn get_timesharing(
        &self,
        symbol: &str,
        market: Market,
        trade_date: Option<&str>,
    ) -> Option<ApiResult> {
        self.call(actions::TIME_SHARING, timesharing_params(symbol, market, trade_date))
            .await
    }

    /// Subscribe to the time-sharing line; one push per minute
    pub async fn sub_timesharing<F>(
        &self,
        symbol: &str,
        market: Market,
        trade_date: Option<&str>,
        callback: F,
    ) -> Option<Subscription>
    where
        F: Fn(&ApiResult) + Send + Sync + 'static,
    {
        self.subscribe(
            actions::TIME_SHARING,
            timesharing_params(symbol, market, trade_date),
            callback,
        )
        .await
    }

    /// Tick / time-and-sales list
    pub async fn get_translist(&self, query: TransListQuery) -> Option<ApiResult> {
        self.call(actions::TRANS_LIST, query.params()).await
    }

    /// Stop dispatch for a subscription
    pub async fn cancel(&self, subscription: &Subscription) -> bool {
        subscription.cancel().await
    }

    pub async fn close(&self) {
        self.conn.close().await;
        info!("Client closed");
    }

    async fn call(&self, action: &str, params: Map<String, Value>) -> Option<ApiResult> {
        if !self.conn.is_connected() {
            debug!(action = %action, "Not connected, call skipped");
            return None;
        }

        match self.conn.request(action, params).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(action = %action, error = %e, "Call failed");
                Some(ApiResult::failure(e.to_string()))
            }
        }
    }

    async fn subscribe<F>(
        &self,
        action: &str,
        params: Map<String, Value>,
        callback: F,
    ) -> Option<Subscription>
    where
        F: Fn(&ApiResult) + Send + Sync + 'static,
    {
        if !self.conn.is_connected() {
            debug!(action = %action, "Not connected, subscription skipped");
            return None;
        }

        match self.conn.subscribe(action, params, callback).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(action = %action, error = %e, "Subscription failed");
                None
            }
        }
    }
}

fn quote_params<S: AsRef<str>>(symbols: &[S]) -> Map<String, Value> {
    let symbols: Vec<&str> = symbols.iter().map(AsRef::as_ref).collect();
    params! { "symbols" => symbols }
}

fn symbol_params(symbol: &str, market: Market) -> Map<String, Value> {
    let (symbol, market) = normalize_symbol(symbol, market);
    params! { "symbol" => symbol, "market" => market.code() }
}

fn timesharing_params(symbol: &str, market: Market, trade_date: Option<&str>) -> Map<String, Value> {
    let mut params = symbol_params(symbol, market);
    params.insert(
        "trade_date".to_string(),
        Value::String(trade_date.unwrap_or_default().to_string()),
    );
    params
}
