pub mod breaker;
pub mod client;

pub use breaker::CircuitBreaker;
pub use client::{categorize, VaultBalance, VaultClient, VaultError, VaultErrorCategory};
