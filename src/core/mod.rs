pub mod multi_timeframe;
pub mod patterns;
pub mod sessions;
pub mod sltp;
pub mod trailing;
