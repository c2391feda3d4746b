//! Paper-trading persistence.
//!
//! Cash lives on the portfolio row; everything else about the portfolio is
//! derived from positions and trades when read. Trades run in one SQLite
//! transaction so cash, position and trade log never disagree.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{
    OrderTicket, Portfolio, Position, Trade, TradeAction, TradeError, TradeReceipt, WatchlistItem,
    STARTING_CASH,
};

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS portfolios (
    user_id TEXT PRIMARY KEY,
    cash REAL NOT NULL,
    total_equity REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS positions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES portfolios(user_id) ON DELETE CASCADE,
    asset TEXT NOT NULL,
    size REAL NOT NULL,
    entry_price REAL NOT NULL,
    current_price REAL NOT NULL,
    opened_at TEXT NOT NULL,
    closed_at TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_positions_open
    ON positions(user_id, asset) WHERE closed_at IS NULL;

CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES portfolios(user_id) ON DELETE CASCADE,
    asset TEXT NOT NULL,
    action TEXT NOT NULL,
    price REAL NOT NULL,
    size REAL NOT NULL,
    pnl REAL,
    strategy TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_user ON trades(user_id, timestamp);

CREATE TABLE IF NOT EXISTS watchlist (
    user_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    name TEXT,
    added_at TEXT NOT NULL,
    PRIMARY KEY (user_id, symbol)
) WITHOUT ROWID;
"#;

/// Remaining size at or below this closes a position.
const SIZE_EPSILON: f64 = 1e-9;

fn now() -> String {
    Utc::now().to_rfc3339()
}

const POSITION_COLUMNS: &str =
    "id, user_id, asset, size, entry_price, current_price, opened_at, closed_at";

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    let size: f64 = row.get(3)?;
    let entry_price: f64 = row.get(4)?;
    let current_price: f64 = row.get(5)?;
    let unrealized_pnl = (current_price - entry_price) * size;
    let cost = entry_price * size;
    Ok(Position {
        id: row.get(0)?,
        user_id: row.get(1)?,
        asset: row.get(2)?,
        size,
        entry_price,
        current_price,
        unrealized_pnl,
        unrealized_pnl_percent: if cost.abs() > f64::EPSILON {
            unrealized_pnl / cost * 100.0
        } else {
            0.0
        },
        opened_at: row.get(6)?,
        closed_at: row.get(7)?,
    })
}

fn open_positions_on(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Position>> {
    let sql = format!(
        "SELECT {} FROM positions WHERE user_id = ?1 AND closed_at IS NULL ORDER BY opened_at, asset",
        POSITION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], position_from_row)?;
    rows.collect()
}

fn open_position_on(conn: &Connection, user_id: &str, asset: &str) -> rusqlite::Result<Option<Position>> {
    let sql = format!(
        "SELECT {} FROM positions WHERE user_id = ?1 AND asset = ?2 AND closed_at IS NULL LIMIT 1",
        POSITION_COLUMNS
    );
    conn.query_row(&sql, params![user_id, asset], position_from_row)
        .optional()
}

fn load_portfolio(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Portfolio>> {
    let row = conn
        .query_row(
            "SELECT cash, created_at, updated_at FROM portfolios WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((cash, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let positions = open_positions_on(conn, user_id)?;
    let positions_value: f64 = positions.iter().map(Position::market_value).sum();

    let (realized_pnl, closed, wins): (f64, i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(pnl), 0),
                COUNT(pnl),
                COALESCE(SUM(CASE WHEN pnl > 0 THEN 1 ELSE 0 END), 0)
         FROM trades WHERE user_id = ?1",
        params![user_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(Some(Portfolio {
        user_id: user_id.to_string(),
        cash,
        positions_value,
        total_equity: cash + positions_value,
        open_positions: positions.len(),
        realized_pnl,
        win_rate: if closed > 0 {
            wins as f64 / closed as f64 * 100.0
        } else {
            0.0
        },
        created_at,
        updated_at,
    }))
}

#[derive(Clone)]
pub struct PortfolioStore {
    conn: Arc<Mutex<Connection>>,
}

impl PortfolioStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open portfolio database at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize portfolio schema")?;

        let portfolios: i64 = conn
            .query_row("SELECT COUNT(*) FROM portfolios", [], |row| row.get(0))
            .unwrap_or(0);
        info!("💼 Portfolio store ready at {} ({} portfolios)", db_path, portfolios);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create the user's portfolio with the starting cash if it does not
    /// exist. Returns the portfolio and whether it was created now.
    pub fn initialize(&self, user_id: &str) -> Result<(Portfolio, bool)> {
        let conn = self.conn.lock();
        let ts = now();
        let created = conn.execute(
            "INSERT OR IGNORE INTO portfolios (user_id, cash, total_equity, created_at, updated_at)
             VALUES (?1, ?2, ?2, ?3, ?3)",
            params![user_id, STARTING_CASH, ts],
        )? > 0;
        if created {
            info!(user_id, "💵 Portfolio initialized with ${:.0}", STARTING_CASH);
        }
        let portfolio = load_portfolio(&conn, user_id)?
            .with_context(|| format!("portfolio for {} vanished after insert", user_id))?;
        Ok((portfolio, created))
    }

    pub fn get(&self, user_id: &str) -> Result<Option<Portfolio>> {
        let conn = self.conn.lock();
        Ok(load_portfolio(&conn, user_id)?)
    }

    /// Apply a validated order to the user's portfolio.
    pub fn execute_trade(&self, user_id: &str, order: &OrderTicket) -> Result<TradeReceipt, TradeError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let ts = now();

        let cash: f64 = tx
            .query_row(
                "SELECT cash FROM portfolios WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(TradeError::PortfolioNotFound)?;

        let total = order.shares * order.price;
        let existing = open_position_on(&tx, user_id, &order.symbol)?;

        let (cash_after, realized_pnl) = match order.action {
            TradeAction::Buy => {
                if cash < total {
                    return Err(TradeError::InsufficientFunds {
                        required: total,
                        available: cash,
                    });
                }
                match &existing {
                    Some(pos) => {
                        let new_size = pos.size + order.shares;
                        let avg_entry = (pos.entry_price * pos.size + order.price * order.shares) / new_size;
                        tx.execute(
                            "UPDATE positions SET size = ?2, entry_price = ?3, current_price = ?4, updated_at = ?5
                             WHERE id = ?1",
                            params![pos.id, new_size, avg_entry, order.price, ts],
                        )?;
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO positions
                                (id, user_id, asset, size, entry_price, current_price, opened_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?6)",
                            params![
                                Uuid::new_v4().to_string(),
                                user_id,
                                order.symbol,
                                order.shares,
                                order.price,
                                ts
                            ],
                        )?;
                    }
                }
                (cash - total, None)
            }
            TradeAction::Sell => {
                let pos = match &existing {
                    Some(pos) if pos.size + SIZE_EPSILON >= order.shares => pos,
                    _ => {
                        return Err(TradeError::InsufficientPosition {
                            symbol: order.symbol.clone(),
                            held: existing.as_ref().map(|p| p.size).unwrap_or(0.0),
                            requested: order.shares,
                        })
                    }
                };
                let remaining = pos.size - order.shares;
                if remaining <= SIZE_EPSILON {
                    tx.execute(
                        "UPDATE positions SET size = 0, current_price = ?2, closed_at = ?3, updated_at = ?3
                         WHERE id = ?1",
                        params![pos.id, order.price, ts],
                    )?;
                } else {
                    tx.execute(
                        "UPDATE positions SET size = ?2, current_price = ?3, updated_at = ?4 WHERE id = ?1",
                        params![pos.id, remaining, order.price, ts],
                    )?;
                }
                let pnl = (order.price - pos.entry_price) * order.shares;
                (cash + total, Some(pnl))
            }
        };

        let trade_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO trades (id, user_id, asset, action, price, size, pnl, strategy, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trade_id,
                user_id,
                order.symbol,
                order.action.as_str(),
                order.price,
                order.shares,
                realized_pnl,
                order.strategy,
                ts
            ],
        )?;

        let positions_value: f64 = open_positions_on(&tx, user_id)?
            .iter()
            .map(Position::market_value)
            .sum();
        tx.execute(
            "UPDATE portfolios SET cash = ?2, total_equity = ?3, updated_at = ?4 WHERE user_id = ?1",
            params![user_id, cash_after, cash_after + positions_value, ts],
        )?;

        tx.commit()?;

        debug!(
            user_id,
            symbol = %order.symbol,
            action = order.action.as_str(),
            shares = order.shares,
            price = order.price,
            "trade executed"
        );

        Ok(TradeReceipt {
            trade_id,
            symbol: order.symbol.clone(),
            action: order.action,
            shares: order.shares,
            price: order.price,
            total,
            cash_after,
            realized_pnl,
        })
    }

    /// Oldest first.
    pub fn list_trades(&self, user_id: &str) -> Result<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, asset, action, price, size, pnl, strategy, timestamp
             FROM trades WHERE user_id = ?1 ORDER BY timestamp, rowid",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let action: String = row.get(3)?;
            Ok(Trade {
                id: row.get(0)?,
                user_id: row.get(1)?,
                asset: row.get(2)?,
                action: if action == "sell" {
                    TradeAction::Sell
                } else {
                    TradeAction::Buy
                },
                price: row.get(4)?,
                size: row.get(5)?,
                pnl: row.get(6)?,
                strategy: row.get(7)?,
                timestamp: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn open_positions(&self, user_id: &str) -> Result<Vec<Position>> {
        let conn = self.conn.lock();
        Ok(open_positions_on(&conn, user_id)?)
    }

    /// Idempotent; a second add keeps the original entry.
    pub fn add_to_watchlist(&self, user_id: &str, symbol: &str, name: Option<&str>) -> Result<WatchlistItem> {
        let symbol = symbol.trim().to_uppercase();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO watchlist (user_id, symbol, name, added_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, symbol, name, now()],
        )?;
        let item = conn.query_row(
            "SELECT symbol, name, added_at FROM watchlist WHERE user_id = ?1 AND symbol = ?2",
            params![user_id, symbol],
            |row| {
                Ok(WatchlistItem {
                    symbol: row.get(0)?,
                    name: row.get(1)?,
                    added_at: row.get(2)?,
                })
            },
        )?;
        Ok(item)
    }

    /// Returns false when the symbol was not on the list.
    pub fn remove_from_watchlist(&self, user_id: &str, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM watchlist WHERE user_id = ?1 AND symbol = ?2",
            params![user_id, symbol.trim().to_uppercase()],
        )?;
        Ok(removed > 0)
    }

    pub fn watchlist(&self, user_id: &str) -> Result<Vec<WatchlistItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, name, added_at FROM watchlist WHERE user_id = ?1 ORDER BY added_at, symbol",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(WatchlistItem {
                symbol: row.get(0)?,
                name: row.get(1)?,
                added_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::models::TradeRequest;
    use tempfile::NamedTempFile;

    fn store() -> (PortfolioStore, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let store = PortfolioStore::new(file.path().to_str().unwrap()).unwrap();
        (store, file)
    }

    fn order(symbol: &str, action: &str, shares: f64, price: f64) -> OrderTicket {
        TradeRequest {
            symbol: symbol.into(),
            action: action.into(),
            shares,
            price,
            strategy: None,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (store, _f) = store();
        let (p, created) = store.initialize("u1").unwrap();
        assert!(created);
        assert_eq!(p.cash, STARTING_CASH);
        assert_eq!(p.total_equity, STARTING_CASH);

        let (_, created_again) = store.initialize("u1").unwrap();
        assert!(!created_again);
        assert!(store.get("nobody").unwrap().is_none());
    }

    #[test]
    fn test_buy_averages_entry() {
        let (store, _f) = store();
        store.initialize("u1").unwrap();
        store.execute_trade("u1", &order("aapl", "buy", 10.0, 100.0)).unwrap();
        let r = store.execute_trade("u1", &order("AAPL", "buy", 30.0, 120.0)).unwrap();
        assert_eq!(r.cash_after, 100_000.0 - 1_000.0 - 3_600.0);

        let positions = store.open_positions("u1").unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].asset, "AAPL");
        assert_eq!(positions[0].size, 40.0);
        assert!((positions[0].entry_price - 115.0).abs() < 1e-9);

        let p = store.get("u1").unwrap().unwrap();
        assert!((p.total_equity - (p.cash + 40.0 * 120.0)).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_funds_leaves_state_untouched() {
        let (store, _f) = store();
        store.initialize("u1").unwrap();
        let err = store
            .execute_trade("u1", &order("AAPL", "buy", 1_000.0, 150.0))
            .unwrap_err();
        assert!(matches!(err, TradeError::InsufficientFunds { .. }));
        assert_eq!(err.to_string(), "Insufficient funds");
        assert!(store.list_trades("u1").unwrap().is_empty());
        assert_eq!(store.get("u1").unwrap().unwrap().cash, STARTING_CASH);
    }

    #[test]
    fn test_sell_realizes_pnl_and_closes() {
        let (store, _f) = store();
        store.initialize("u1").unwrap();
        store.execute_trade("u1", &order("MSFT", "buy", 10.0, 300.0)).unwrap();

        let partial = store.execute_trade("u1", &order("MSFT", "sell", 4.0, 310.0)).unwrap();
        assert_eq!(partial.realized_pnl, Some(40.0));
        assert_eq!(store.open_positions("u1").unwrap()[0].size, 6.0);

        let rest = store.execute_trade("u1", &order("MSFT", "sell", 6.0, 290.0)).unwrap();
        assert_eq!(rest.realized_pnl, Some(-60.0));
        assert!(store.open_positions("u1").unwrap().is_empty());

        let p = store.get("u1").unwrap().unwrap();
        assert!((p.cash - (STARTING_CASH - 20.0)).abs() < 1e-9);
        assert_eq!(p.realized_pnl, -20.0);
        assert_eq!(p.win_rate, 50.0);
        assert_eq!(store.list_trades("u1").unwrap().len(), 3);
    }

    #[test]
    fn test_sell_without_position() {
        let (store, _f) = store();
        store.initialize("u1").unwrap();
        let err = store
            .execute_trade("u1", &order("TSLA", "sell", 1.0, 200.0))
            .unwrap_err();
        assert!(matches!(err, TradeError::InsufficientPosition { .. }));
    }

    #[test]
    fn test_missing_portfolio() {
        let (store, _f) = store();
        let err = store
            .execute_trade("ghost", &order("AAPL", "buy", 1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, TradeError::PortfolioNotFound));
    }

    #[test]
    fn test_watchlist() {
        let (store, _f) = store();
        store.add_to_watchlist("u1", "nvda", Some("NVIDIA")).unwrap();
        store.add_to_watchlist("u1", "NVDA", None).unwrap();
        let list = store.watchlist("u1").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name.as_deref(), Some("NVIDIA"));

        assert!(store.remove_from_watchlist("u1", "nvda").unwrap());
        assert!(!store.remove_from_watchlist("u1", "nvda").unwrap());
    }
}
