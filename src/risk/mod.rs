pub mod circuit_breaker;
pub mod gate;
pub mod limits;
pub mod rate_limit;
