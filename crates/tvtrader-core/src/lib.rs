//! tvtrader 핵심 도메인 크레이트.
//!
//! 시그널 기반 선물 트레이딩 엔진의 도메인 모델과
//! 거래소 중립 게이트웨이 추상화를 제공합니다.
//!
//! - [`domain`] - Bot, TradeRecord, WebhookSignal 등 엔티티
//! - [`gateway`] - `FuturesGateway` trait 및 거래소 중립 타입
//! - [`symbol`] - 심볼 정규화 / 호가단위 반올림 유틸리티

pub mod domain;
pub mod gateway;
pub mod symbol;

pub use domain::{
    Bot, BotId, BotStatus, LeverageType, OrderSizing, PendingFlip, PositionState, PriceSpec,
    SignalAction, TradeKind, TradeRecord, TradeSide, WebhookSignal,
};
pub use gateway::{
    FuturesGateway, FuturesOrderRequest, FuturesOrderResponse, FuturesOrderType, GatewayError,
    OrderSide, PositionInfo, PositionMode, SymbolFilters,
};
pub use symbol::{round_down_to_step, to_futures_symbol};
