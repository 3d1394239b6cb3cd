use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::models::Direction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopState {
    pub trade_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub initial_stop: f64,
    pub current_stop: f64,
    /// Highest price seen for a BUY, lowest for a SELL.
    pub extreme_price: f64,
    pub trailing_distance: f64,
    pub triggered: bool,
}

/// Outcome of feeding one price into a trailing stop.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailingUpdate {
    Unchanged,
    Moved { from: f64, to: f64 },
    Triggered { stop: f64, price: f64 },
}

/// Trailing stops for open trades, keyed by trade id. Stops ratchet toward
/// price and never loosen.
pub struct TrailingStopManager {
    stops: HashMap<String, TrailingStopState>,
    atr_multiple: f64,
}

impl TrailingStopManager {
    pub fn new(atr_multiple: f64) -> Self {
        Self {
            stops: HashMap::new(),
            atr_multiple,
        }
    }

    /// Start trailing a freshly opened trade from its initial stop.
    pub fn init(
        &mut self,
        trade_id: &str,
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        initial_stop: f64,
        atr: f64,
    ) {
        let state = TrailingStopState {
            trade_id: trade_id.to_string(),
            symbol: symbol.to_string(),
            direction,
            initial_stop,
            current_stop: initial_stop,
            extreme_price: entry_price,
            trailing_distance: atr * self.atr_multiple,
            triggered: false,
        };
        debug!(
            "Trailing {} {} from stop {:.4} (distance {:.4})",
            trade_id, direction, initial_stop, state.trailing_distance
        );
        self.stops.insert(trade_id.to_string(), state);
    }

    pub fn update(&mut self, trade_id: &str, price: f64) -> Option<TrailingUpdate> {
        let s = self.stops.get_mut(trade_id)?;
        if s.triggered {
            return Some(TrailingUpdate::Unchanged);
        }

        let crossed = match s.direction {
            Direction::Buy => price <= s.current_stop,
            Direction::Sell => price >= s.current_stop,
        };
        if crossed {
            s.triggered = true;
            info!(
                "Trailing stop hit for {} {}: price {:.4} crossed {:.4}",
                s.trade_id, s.direction, price, s.current_stop
            );
            return Some(TrailingUpdate::Triggered {
                stop: s.current_stop,
                price,
            });
        }

        let from = s.current_stop;
        match s.direction {
            Direction::Buy => {
                if price > s.extreme_price {
                    s.extreme_price = price;
                }
                let candidate = s.extreme_price - s.trailing_distance;
                if candidate > s.current_stop {
                    s.current_stop = candidate;
                }
            }
            Direction::Sell => {
                if price < s.extreme_price {
                    s.extreme_price = price;
                }
                let candidate = s.extreme_price + s.trailing_distance;
                if candidate < s.current_stop {
                    s.current_stop = candidate;
                }
            }
        }

        if (s.current_stop - from).abs() > f64::EPSILON {
            debug!("Trailing {} stop {:.4} -> {:.4}", s.trade_id, from, s.current_stop);
            Some(TrailingUpdate::Moved {
                from,
                to: s.current_stop,
            })
        } else {
            Some(TrailingUpdate::Unchanged)
        }
    }

    /// Pull the trailing distance in, e.g. when the breaker asks for tighter stops.
    pub fn tighten(&mut self, factor: f64) {
        for s in self.stops.values_mut() {
            s.trailing_distance *= factor.clamp(0.0, 1.0);
        }
    }

    pub fn get(&self, trade_id: &str) -> Option<&TrailingStopState> {
        self.stops.get(trade_id)
    }

    pub fn open_trades(&self) -> Vec<TrailingStopState> {
        self.stops.values().cloned().collect()
    }

    pub fn remove(&mut self, trade_id: &str) -> Option<TrailingStopState> {
        self.stops.remove(trade_id)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }
}
