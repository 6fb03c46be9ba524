//! Typed endpoint parameters
//!
//! Each query renders itself into the parameter map carried next to the
//! `act` field of a request envelope.

use serde_json::{Map, Value};

use crate::params;

/// Exchange a security is listed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    /// Shenzhen
    Sz,
    /// Shanghai
    Sh,
    /// Beijing
    Bj,
}

impl Market {
    const ALL: [Market; 3] = [Market::Sz, Market::Sh, Market::Bj];

    /// Numeric code used on the wire
    pub fn code(self) -> u8 {
        match self {
            Market::Sz => 0,
            Market::Sh => 1,
            Market::Bj => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    /// Two-letter symbol prefix, e.g. `sz` in `sz000001`
    pub fn prefix(self) -> &'static str {
        match self {
            Market::Sz => "sz",
            Market::Sh => "sh",
            Market::Bj => "bj",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        let prefix = prefix.to_ascii_lowercase();
        Self::ALL.into_iter().find(|m| m.prefix() == prefix)
    }
}

/// Strip a market prefix from `symbol`, letting it override `market`.
/// `sh600000` becomes (`600000`, Sh); plain codes pass through unchanged.
pub fn normalize_symbol(symbol: &str, market: Market) -> (String, Market) {
    let head = symbol.get(..2).unwrap_or_default();
    if head.len() == 2 && !head.chars().all(|c| c.is_ascii_digit()) {
        if let Some(prefixed) = Market::from_prefix(head) {
            return (symbol[2..].to_string(), prefixed);
        }
    }
    (symbol.to_string(), market)
}

/// Classification used by the category lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Industry,
    Concept,
    Region,
}

impl Category {
    pub fn id(self) -> u8 {
        match self {
            Category::Industry => 0,
            Category::Concept => 1,
            Category::Region => 2,
        }
    }
}

/// Price adjustment (`fq`) for history bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdjustKind {
    #[default]
    None,
    Forward,
    Backward,
}

impl AdjustKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustKind::None => "",
            AdjustKind::Forward => "qfq",
            AdjustKind::Backward => "hfq",
        }
    }
}

/// Bar period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cycle {
    Min1,
    Min5,
    Min15,
    Min30,
    Min60,
    #[default]
    Day,
    Week,
    Month,
}

impl Cycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Cycle::Min1 => "1m",
            Cycle::Min5 => "5m",
            Cycle::Min15 => "15m",
            Cycle::Min30 => "30m",
            Cycle::Min60 => "60m",
            Cycle::Day => "day",
            Cycle::Week => "week",
            Cycle::Month => "month",
        }
    }
}

/// Financial statement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportType {
    /// Key indicators
    #[default]
    Index,
    Profit,
    CashFlow,
    BalanceSheet,
}

impl ReportType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::Index => "index",
            ReportType::Profit => "profit",
            ReportType::CashFlow => "cashflow",
            ReportType::BalanceSheet => "balancesheet",
        }
    }
}

/// History bar request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineQuery {
    pub symbol: String,
    pub market: Market,
    pub page: u32,
    pub page_size: u32,
    pub adjust: AdjustKind,
    pub cycle: Cycle,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl KlineQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 320;

    pub fn new(symbol: impl Into<String>, market: Market) -> Self {
        Self {
            symbol: symbol.into(),
            market,
            page: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
            adjust: AdjustKind::default(),
            cycle: Cycle::default(),
            start: None,
            end: None,
        }
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn adjust(mut self, adjust: AdjustKind) -> Self {
        self.adjust = adjust;
        self
    }

    pub fn cycle(mut self, cycle: Cycle) -> Self {
        self.cycle = cycle;
        self
    }

    /// Date range, `%Y-%m-%d`
    pub fn range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    pub fn params(&self) -> Map<String, Value> {
        let (symbol, market) = normalize_symbol(&self.symbol, self.market);
        params! {
            "symbol" => symbol,
            "market" => market.code(),
            "page" => self.page,
            "page_size" => self.page_size,
            "fq" => self.adjust.as_str(),
            "cycle" => self.cycle.as_str(),
            "start" => self.start,
            "end" => self.end,
        }
    }
}

/// Security listing filter; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockQuery {
    pub market: Option<Market>,
    pub symbol: Option<String>,
    pub industry: Option<String>,
    pub concept: Option<String>,
    pub region: Option<String>,
    /// `%Y-%m-%d`
    pub listing_date: Option<String>,
}

impl StockQuery {
    pub fn market(market: Market) -> Self {
        Self {
            market: Some(market),
            ..Self::default()
        }
    }

    pub fn symbol(symbol: impl Into<String>, market: Market) -> Self {
        Self {
            market: Some(market),
            symbol: Some(symbol.into()),
            ..Self::default()
        }
    }

    pub fn params(&self) -> Map<String, Value> {
        let (symbol, market) = match (&self.symbol, self.market) {
            (Some(symbol), Some(market)) => {
                let (symbol, market) = normalize_symbol(symbol, market);
                (Some(symbol), Some(market))
            }
            (symbol, market) => (symbol.clone(), market),
        };

        params! {
            "symbol" => symbol,
            "market" => market.map(Market::code),
            "hangye" => self.industry,
            "gainian" => self.concept,
            "diyu" => self.region,
            "listing_date" => self.listing_date,
        }
    }
}

/// Tick / time-and-sales page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransListQuery {
    pub symbol: String,
    pub market: Market,
    pub trade_date: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl TransListQuery {
    pub fn new(symbol: impl Into<String>, market: Market) -> Self {
        Self {
            symbol: symbol.into(),
            market,
            trade_date: None,
            page: 1,
            page_size: 10,
        }
    }

    pub fn trade_date(mut self, date: impl Into<String>) -> Self {
        self.trade_date = Some(date.into());
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn params(&self) -> Map<String, Value> {
        let (symbol, market) = normalize_symbol(&self.symbol, self.market);
        params! {
            "symbol" => symbol,
            "market" => market.code(),
            "trade_date" => self.trade_date.clone().unwrap_or_default(),
            "page" => self.page,
            "page_size" => self.page_size,
        }
    }
}
