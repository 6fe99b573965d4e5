//! 체결 기록 (Trade Ledger 엔트리).
//!
//! 봇별 OPEN/CLOSE 체결 사실을 기록하는 불변 엔트리입니다.
//! P&L 계산의 유일한 근거 데이터이며, 생성 이후 수정/삭제되지 않습니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::BotId;

/// 체결 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    /// 포지션 진입 체결
    Open,
    /// 포지션 청산 체결
    Close,
}

impl std::fmt::Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeKind::Open => write!(f, "OPEN"),
            TradeKind::Close => write!(f, "CLOSE"),
        }
    }
}

impl std::str::FromStr for TradeKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(TradeKind::Open),
            "CLOSE" => Ok(TradeKind::Close),
            _ => Err(format!("Invalid trade kind: {}", s)),
        }
    }
}

/// 체결 방향.
///
/// CLOSE 기록의 side는 "청산한 포지션의 방향"입니다.
/// FIFO 손익 매칭이 LONG/SHORT 구분에 의존하므로
/// CLOSE를 별도 방향으로 기록하지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    /// 반대 방향.
    pub fn opposite(self) -> Self {
        match self {
            TradeSide::Long => TradeSide::Short,
            TradeSide::Short => TradeSide::Long,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Long => write!(f, "LONG"),
            TradeSide::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for TradeSide {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(TradeSide::Long),
            "SHORT" => Ok(TradeSide::Short),
            _ => Err(format!("Invalid trade side: {}", s)),
        }
    }
}

/// 체결 기록.
///
/// `seq`는 저장소가 부여하는 원장 내 단조 증가 순번입니다.
/// FIFO 매칭과 정렬은 벽시계 시간이 아닌 `seq` 기준으로 수행됩니다
/// (연속 시그널에서 타임스탬프가 겹칠 수 있음).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// 원장 순번 (저장 시 부여, 0이면 미부여)
    pub seq: i64,
    /// 봇 ID
    pub bot_id: BotId,
    /// 거래소 주문번호
    pub order_id: String,
    /// OPEN / CLOSE
    pub kind: TradeKind,
    /// 체결 방향 (CLOSE는 청산된 포지션의 방향)
    pub side: TradeSide,
    /// 체결가
    pub price: Decimal,
    /// 체결 수량
    pub quantity: Decimal,
    /// 체결 시각 (표시용)
    pub timestamp: DateTime<Utc>,
    /// 선물 심볼 (예: "BTCUSDT")
    pub symbol: String,
}

impl TradeRecord {
    /// 순번 미부여 상태의 새 기록 생성.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot_id: BotId,
        order_id: impl Into<String>,
        kind: TradeKind,
        side: TradeSide,
        price: Decimal,
        quantity: Decimal,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            bot_id,
            order_id: order_id.into(),
            kind,
            side,
            price,
            quantity,
            timestamp: Utc::now(),
            symbol: symbol.into(),
        }
    }
}
