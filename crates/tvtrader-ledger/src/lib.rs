//! 체결 원장 저장소와 FIFO 손익 계산기.
//!
//! - [`store`] - `TradeStore`/`BotStore` trait과 메모리/PostgreSQL 구현체
//! - [`pnl`] - 순수 FIFO 실현/미실현 손익 계산

pub mod pnl;
pub mod store;

pub use pnl::{compute_profit, ProfitReport};
pub use store::{
    BotStore, LedgerError, MemoryBotStore, MemoryTradeStore, PgBotStore, PgTradeStore, TradeStore,
};
