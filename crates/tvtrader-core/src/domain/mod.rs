//! 도메인 엔티티.
//!
//! 봇, 체결 기록, 웹훅 시그널 등 엔진이 다루는 핵심 타입을 정의합니다.

mod bot;
mod signal;
mod trade;

pub use bot::{Bot, BotId, BotStatus, LeverageType, OrderSizing, PendingFlip, PositionState};
pub use signal::{PriceSpec, SignalAction, WebhookSignal};
pub use trade::{TradeKind, TradeRecord, TradeSide};
