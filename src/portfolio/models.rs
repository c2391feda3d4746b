use serde::{Deserialize, Serialize};

/// Play money every new portfolio starts with.
pub const STARTING_CASH: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TradeError> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(TradeAction::Buy),
            "sell" => Ok(TradeAction::Sell),
            "short" => Err(TradeError::Validation(
                "Short selling is not supported".to_string(),
            )),
            _ => Err(TradeError::Validation("Invalid action".to_string())),
        }
    }
}

/// Portfolio with values derived from its open positions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub user_id: String,
    pub cash: f64,
    pub positions_value: f64,
    pub total_equity: f64,
    pub open_positions: usize,
    pub realized_pnl: f64,
    /// Percent of closing trades with positive pnl.
    pub win_rate: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    pub user_id: String,
    pub asset: String,
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_percent: f64,
    pub opened_at: String,
    pub closed_at: Option<String>,
}

impl Position {
    pub fn market_value(&self) -> f64 {
        self.size * self.current_price
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    pub asset: String,
    pub action: TradeAction,
    pub price: f64,
    pub size: f64,
    pub pnl: Option<f64>,
    pub strategy: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub shares: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub strategy: Option<String>,
}

/// A trade request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTicket {
    pub symbol: String,
    pub action: TradeAction,
    pub shares: f64,
    pub price: f64,
    pub strategy: String,
}

impl TradeRequest {
    pub fn validate(&self) -> Result<OrderTicket, TradeError> {
        let symbol = self.symbol.trim().to_uppercase();
        if symbol.is_empty() || self.action.trim().is_empty() {
            return Err(TradeError::Validation("Missing required fields".to_string()));
        }
        let action = TradeAction::parse(&self.action)?;
        if !self.shares.is_finite() || self.shares <= 0.0 {
            return Err(TradeError::Validation("Invalid share amount".to_string()));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(TradeError::Validation("Invalid price".to_string()));
        }
        Ok(OrderTicket {
            symbol,
            action,
            shares: self.shares,
            price: self.price,
            strategy: self
                .strategy
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "manual".to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeReceipt {
    pub trade_id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub shares: f64,
    pub price: f64,
    pub total: f64,
    pub cash_after: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub symbol: String,
    pub name: Option<String>,
    pub added_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistRequest {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Trade rejection
#[derive(Debug)]
pub enum TradeError {
    Validation(String),
    PortfolioNotFound,
    InsufficientFunds { required: f64, available: f64 },
    InsufficientPosition { symbol: String, held: f64, requested: f64 },
    Storage(rusqlite::Error),
}

impl std::fmt::Display for TradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeError::Validation(msg) => write!(f, "{}", msg),
            TradeError::PortfolioNotFound => write!(f, "Portfolio not found"),
            TradeError::InsufficientFunds { .. } => write!(f, "Insufficient funds"),
            TradeError::InsufficientPosition {
                symbol,
                held,
                requested,
            } => write!(
                f,
                "Insufficient position in {}: holding {}, selling {}",
                symbol, held, requested
            ),
            TradeError::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for TradeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TradeError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TradeError {
    fn from(e: rusqlite::Error) -> Self {
        TradeError::Storage(e)
    }
}
