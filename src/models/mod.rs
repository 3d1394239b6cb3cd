pub mod alert;
pub mod candle;
pub mod direction;
pub mod indicators;
pub mod timeframe;

pub use alert::{Alert, AlertSeverity, AlertType};
pub use candle::{Candle, CandleSeries};
pub use direction::*;
pub use indicators::{
    IndicatorSnapshot, MarketContext, Oscillators, PriceAction, TrendMeasures,
    VolatilityMeasures,
};
pub use timeframe::Timeframe;
