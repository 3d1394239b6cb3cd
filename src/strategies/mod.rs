pub mod scorer;
pub mod signals;
