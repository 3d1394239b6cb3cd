pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod models;
pub mod risk;
pub mod scheduler;
pub mod strategies;
#[cfg(test)]
pub mod test_helpers;
pub mod trading;
