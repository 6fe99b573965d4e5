//! 트레이딩 봇 엔티티.
//!
//! 봇은 하나의 거래소/페어에 바인딩된 트레이딩 정책입니다.
//! 포지션 관련 필드(`position`, `entry_price`, `open_positions`)는
//! 거래소 상태의 비정규화 뷰이며, 제어 판단에는 항상 거래소 조회 결과를
//! 우선 사용합니다 (캐시는 표시용).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeSide;

/// 봇 식별자.
pub type BotId = i64;

/// 봇 라이프사이클 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    /// 시그널 수신/처리 중
    Active,
    /// 일시정지 (시그널 거부)
    Paused,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::Active => write!(f, "active"),
            BotStatus::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for BotStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(BotStatus::Active),
            "paused" => Ok(BotStatus::Paused),
            _ => Err(format!("Invalid bot status: {}", s)),
        }
    }
}

/// 마진 타입.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeverageType {
    Cross,
    Isolated,
}

impl std::fmt::Display for LeverageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeverageType::Cross => write!(f, "cross"),
            LeverageType::Isolated => write!(f, "isolated"),
        }
    }
}

impl std::str::FromStr for LeverageType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cross" => Ok(LeverageType::Cross),
            "isolated" => Ok(LeverageType::Isolated),
            _ => Err(format!("Invalid leverage type: {}", s)),
        }
    }
}

/// 주문 크기 정책.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum OrderSizing {
    /// 고정 금액 (quote 통화, 예: USDT)
    Quote(Decimal),
    /// 시작 잔고 대비 비율 (예: 0.5 = 50%)
    PercentOfBalance(Decimal),
}

impl OrderSizing {
    /// 사이징 기준 금액 계산.
    pub fn basis(&self, start_balance: Decimal) -> Decimal {
        match self {
            OrderSizing::Quote(amount) => *amount,
            OrderSizing::PercentOfBalance(pct) => start_balance * *pct,
        }
    }
}

/// 현재 포지션 상태 (비정규화 뷰).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    #[default]
    None,
    Long,
    Short,
}

impl PositionState {
    /// 체결 방향으로 변환. `None`이면 변환 불가.
    pub fn as_side(self) -> Option<TradeSide> {
        match self {
            PositionState::None => None,
            PositionState::Long => Some(TradeSide::Long),
            PositionState::Short => Some(TradeSide::Short),
        }
    }
}

impl From<TradeSide> for PositionState {
    fn from(side: TradeSide) -> Self {
        match side {
            TradeSide::Long => PositionState::Long,
            TradeSide::Short => PositionState::Short,
        }
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionState::None => write!(f, "none"),
            PositionState::Long => write!(f, "long"),
            PositionState::Short => write!(f, "short"),
        }
    }
}

impl std::str::FromStr for PositionState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(PositionState::None),
            "long" => Ok(PositionState::Long),
            "short" => Ok(PositionState::Short),
            _ => Err(format!("Invalid position state: {}", s)),
        }
    }
}

/// 진행 중인 플립(반대 방향 전환) 마커.
///
/// 청산 주문 제출 전에 봇에 영속화하고 신규 진입 완료 후 제거합니다.
/// 두 주문 사이에서 프로세스가 중단되어도 리컨실러가 이 마커를 보고
/// 진입 레그를 재개하거나 마커를 정리할 수 있습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFlip {
    /// 전환 목표 방향
    pub target: TradeSide,
    /// 신규 진입 수량
    pub quantity: Decimal,
    /// 기준가 (손절가 계산/복구용)
    pub reference_price: Decimal,
    /// 마커 생성 시각
    pub started_at: DateTime<Utc>,
}

/// 트레이딩 봇.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    /// 봇 ID
    pub id: BotId,
    /// 표시 이름
    pub name: String,
    /// 거래 페어 (예: "BTCUSDT" 또는 TradingView 표기 "BINANCE:BTCUSDT.P")
    pub pair: String,
    /// 거래소 이름
    pub exchange: String,
    /// 웹훅 인증 토큰
    pub token: String,
    /// 라이프사이클 상태
    pub status: BotStatus,
    /// 마진 타입
    pub leverage_type: LeverageType,
    /// 레버리지 배수
    pub leverage_value: u32,
    /// 주문 크기 정책
    pub order_sizing: OrderSizing,
    /// 시작 잔고 (quote 통화, 손익률 분모)
    pub start_balance: Decimal,
    /// 손절 비율 (%, 예: 2.5 = 진입가 대비 2.5%)
    pub stop_loss_pct: Decimal,
    /// 손절 주문 사용 여부
    pub stop_loss_enabled: bool,

    // === 비정규화 포지션 뷰 ===
    /// 현재 포지션 방향
    pub position: PositionState,
    /// 진입가 (position == None이면 0)
    pub entry_price: Decimal,
    /// 미청산 lot 수 (position == None이면 0)
    pub open_positions: u32,

    // === 집계/표시 필드 ===
    /// 누적 체결 수
    pub trades: u64,
    /// 총 손익률 (%)
    pub profit_pct: Decimal,
    /// 현재 잔고 (start_balance + 총 손익)
    pub current_balance: Decimal,
    /// 마지막 시그널 액션
    pub last_signal: Option<String>,
    /// 마지막 시그널 시각
    pub last_signal_time: Option<DateTime<Utc>>,

    /// 진행 중인 플립 마커
    pub pending_flip: Option<PendingFlip>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
}

impl Bot {
    /// 포지션 필드를 플랫 상태로 초기화.
    pub fn clear_position(&mut self) {
        self.position = PositionState::None;
        self.entry_price = Decimal::ZERO;
        self.open_positions = 0;
    }

    /// 포지션 채택 (거래소 조회 결과를 로컬 진실로).
    pub fn adopt_position(&mut self, side: TradeSide, entry_price: Decimal) {
        self.position = side.into();
        self.entry_price = entry_price;
        self.open_positions = 1;
    }

    /// 불변식 검사: `position == None` ⇔ 포지션 필드가 모두 0.
    pub fn position_fields_consistent(&self) -> bool {
        match self.position {
            PositionState::None => self.entry_price.is_zero() && self.open_positions == 0,
            _ => self.open_positions > 0,
        }
    }
}
