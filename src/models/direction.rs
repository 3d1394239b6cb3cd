use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }

    /// +1.0 for buys, -1.0 for sells. Multiplying a distance by this moves it
    /// in the favourable direction.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Sideways => write!(f, "sideways"),
        }
    }
}

impl Trend {
    pub fn to_direction(self) -> Option<Direction> {
        match self {
            Trend::Bullish => Some(Direction::Buy),
            Trend::Bearish => Some(Direction::Sell),
            Trend::Sideways => None,
        }
    }

    pub fn agrees_with(self, direction: Direction) -> bool {
        self.to_direction() == Some(direction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeProfile {
    High,
    Normal,
    Low,
}

impl fmt::Display for VolumeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeProfile::High => write!(f, "high"),
            VolumeProfile::Normal => write!(f, "normal"),
            VolumeProfile::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Crypto,
    Forex,
    Stocks,
    Commodities,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Crypto => "crypto",
            Market::Forex => "forex",
            Market::Stocks => "stocks",
            Market::Commodities => "commodities",
        }
    }

    pub fn all() -> [Market; 4] {
        [
            Market::Crypto,
            Market::Forex,
            Market::Stocks,
            Market::Commodities,
        ]
    }
}

/// Circuit breaker tier. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Normal,
    Warning,
    Critical,
    Halted,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Normal => write!(f, "NORMAL"),
            RiskTier::Warning => write!(f, "WARNING"),
            RiskTier::Critical => write!(f, "CRITICAL"),
            RiskTier::Halted => write!(f, "HALTED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMethod {
    Atr,
    Structure,
}

impl fmt::Display for StopMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopMethod::Atr => write!(f, "atr"),
            StopMethod::Structure => write!(f, "structure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMethod {
    Structure,
    Fibonacci,
}

impl fmt::Display for TargetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMethod::Structure => write!(f, "structure"),
            TargetMethod::Fibonacci => write!(f, "fibonacci"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerAction {
    Entry,
    Exit,
    Modify,
    Cancel,
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerAction::Entry => write!(f, "ENTRY"),
            LedgerAction::Exit => write!(f, "EXIT"),
            LedgerAction::Modify => write!(f, "MODIFY"),
            LedgerAction::Cancel => write!(f, "CANCEL"),
        }
    }
}
