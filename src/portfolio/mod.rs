//! Paper-trading portfolios: cash, positions, trade log and watchlist.

pub mod models;
pub mod store;

pub use models::{
    OrderTicket, Portfolio, Position, Trade, TradeAction, TradeError, TradeReceipt, TradeRequest,
    WatchlistItem, WatchlistRequest, STARTING_CASH,
};
pub use store::PortfolioStore;
