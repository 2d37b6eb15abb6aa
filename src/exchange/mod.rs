//! Exchange connectivity: spot REST client, wire types, and test doubles.

pub mod client;
pub mod mock;
pub mod traits;
pub mod types;

pub use client::BinanceClient;
pub use mock::MockSpotClient;
pub use traits::MarketClient;
