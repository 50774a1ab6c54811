pub mod kline_store;
pub mod orderbook;
pub mod trade_tape;

pub use kline_store::{Candle, KlineStore};
pub use orderbook::OrderBookStore;
pub use trade_tape::TradeTape;
