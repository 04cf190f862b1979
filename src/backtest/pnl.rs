//! Position and PnL accounting shared by the backtester.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Positions below this absolute quantity are treated as flat and removed.
const POSITION_EPSILON: f64 = 1e-8;

/// Cost-basis accounting method. All methods currently blend into an
/// average entry price; the variants keep the configuration surface stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CostMethod {
    #[default]
    Average,
    Fifo,
    Lifo,
}

/// An open position in one symbol. Quantity is signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Buy,
    Sell,
    Close,
    PartialClose,
}

/// One booked fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub kind: TransactionKind,
}

/// Portfolio-level aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub cash: f64,
    pub total_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
    /// Sum of absolute position notionals.
    pub exposure: f64,
    /// exposure / total_value when positive.
    pub leverage: f64,
    pub num_positions: usize,
}

/// Multi-symbol position tracker with cash accounting.
pub struct PnLTracker {
    method: CostMethod,
    initial_cash: f64,
    cash: f64,
    positions: HashMap<String, Position>,
    realized_pnl: HashMap<String, f64>,
    transactions: Vec<Transaction>,
}

impl PnLTracker {
    pub fn new(initial_cash: f64, method: CostMethod) -> Self {
        Self {
            method,
            initial_cash,
            cash: initial_cash,
            positions: HashMap::new(),
            realized_pnl: HashMap::new(),
            transactions: Vec::new(),
        }
    }

    /// Books a signed fill. Same-side quantity blends the entry price;
    /// opposite-side quantity realizes PnL and may flip or flatten the
    /// position. Positions shrinking under the epsilon are removed.
    pub fn add_position(&mut self, symbol: &str, quantity: f64, price: f64) {
        match self.positions.entry(symbol.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(Position {
                    symbol: symbol.to_string(),
                    quantity,
                    avg_entry_price: price,
                    current_price: price,
                    unrealized_pnl: 0.0,
                    realized_pnl: 0.0,
                    total_cost: quantity.abs() * price,
                });
            }
            Entry::Occupied(mut entry) => {
                let position = entry.get_mut();
                let same_side = (position.quantity > 0.0 && quantity > 0.0)
                    || (position.quantity < 0.0 && quantity < 0.0);
                if same_side {
                    Self::blend_entry(position, quantity, price);
                } else {
                    let close_quantity = quantity.abs().min(position.quantity.abs());
                    let side = if position.quantity > 0.0 { 1.0 } else { -1.0 };
                    let pnl = (price - position.avg_entry_price) * close_quantity * side;

                    *self.realized_pnl.entry(symbol.to_string()).or_insert(0.0) += pnl;
                    position.realized_pnl += pnl;

                    position.quantity += quantity;
                    let flat = position.quantity.abs() < POSITION_EPSILON;
                    if flat {
                        entry.remove();
                    } else {
                        let position = entry.get_mut();
                        position.avg_entry_price = price;
                        position.total_cost = position.quantity.abs() * price;
                    }
                }
            }
        }

        self.cash -= quantity * price;
        self.transactions.push(Transaction {
            symbol: symbol.to_string(),
            quantity,
            price,
            kind: if quantity > 0.0 {
                TransactionKind::Buy
            } else {
                TransactionKind::Sell
            },
        });
    }

    /// Flattens a symbol entirely at the given price.
    pub fn close_position(&mut self, symbol: &str, price: f64) {
        let Some(position) = self.positions.remove(symbol) else {
            return;
        };

        let pnl = (price - position.avg_entry_price) * position.quantity;
        *self.realized_pnl.entry(symbol.to_string()).or_insert(0.0) += pnl;

        self.cash += position.quantity * price;
        self.transactions.push(Transaction {
            symbol: symbol.to_string(),
            quantity: -position.quantity,
            price,
            kind: TransactionKind::Close,
        });
    }

    /// Closes up to `|quantity|` against the open position; `quantity` must
    /// oppose the position's side to have any effect.
    pub fn close_partial_position(&mut self, symbol: &str, quantity: f64, price: f64) {
        let Some(position) = self.positions.get_mut(symbol) else {
            return;
        };

        let opposing = (position.quantity > 0.0 && quantity < 0.0)
            || (position.quantity < 0.0 && quantity > 0.0);
        if !opposing {
            return;
        }

        let close_quantity = quantity.abs().min(position.quantity.abs());
        let side = if position.quantity > 0.0 { 1.0 } else { -1.0 };
        let pnl = (price - position.avg_entry_price) * close_quantity * side;

        *self.realized_pnl.entry(symbol.to_string()).or_insert(0.0) += pnl;
        position.realized_pnl += pnl;
        position.quantity += quantity;

        self.cash += close_quantity * price * if quantity < 0.0 { -1.0 } else { 1.0 };

        if position.quantity.abs() < POSITION_EPSILON {
            self.positions.remove(symbol);
        }

        self.transactions.push(Transaction {
            symbol: symbol.to_string(),
            quantity,
            price,
            kind: TransactionKind::PartialClose,
        });
    }

    /// Marks a symbol to the latest trade price.
    pub fn update_price(&mut self, symbol: &str, price: f64) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.current_price = price;
            position.unrealized_pnl = (price - position.avg_entry_price) * position.quantity;
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn unrealized_pnl(&self, symbol: &str) -> f64 {
        self.positions
            .get(symbol)
            .map(|p| p.unrealized_pnl)
            .unwrap_or(0.0)
    }

    pub fn realized_pnl(&self, symbol: &str) -> f64 {
        self.realized_pnl.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn total_pnl(&self, symbol: &str) -> f64 {
        self.realized_pnl(symbol) + self.unrealized_pnl(symbol)
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn portfolio_metrics(&self) -> PortfolioMetrics {
        let mut metrics = PortfolioMetrics {
            cash: self.cash,
            num_positions: self.positions.len(),
            ..Default::default()
        };

        let mut positions_value = 0.0;
        for position in self.positions.values() {
            positions_value += position.quantity * position.current_price;
            metrics.unrealized_pnl += position.unrealized_pnl;
            metrics.exposure += (position.quantity * position.current_price).abs();
        }
        metrics.realized_pnl = self.realized_pnl.values().sum();

        metrics.total_value = self.cash + positions_value;
        metrics.total_pnl = metrics.realized_pnl + metrics.unrealized_pnl;
        metrics.leverage = if metrics.total_value > 0.0 {
            metrics.exposure / metrics.total_value
        } else {
            0.0
        };

        metrics
    }

    pub fn total_portfolio_pnl(&self) -> f64 {
        self.portfolio_metrics().total_pnl
    }

    pub fn reset(&mut self) {
        self.positions.clear();
        self.realized_pnl.clear();
        self.transactions.clear();
        self.cash = self.initial_cash;
    }

    pub fn cost_method(&self) -> CostMethod {
        self.method
    }

    // Every cost method currently blends into the average entry price.
    fn blend_entry(position: &mut Position, quantity: f64, price: f64) {
        let total_quantity = position.quantity + quantity;
        position.avg_entry_price = (position.avg_entry_price * position.quantity.abs()
            + price * quantity.abs())
            / total_quantity.abs();
        position.quantity = total_quantity;
        position.total_cost = position.quantity.abs() * position.avg_entry_price;
    }
}
