//! 선물 거래소 게이트웨이 추상화.
//!
//! 주문 제출, 포지션 조회, 레버리지/마진 설정, 심볼 메타데이터 조회를
//! 거래소 중립 인터페이스로 제공합니다. 실제 거래소 HTTP 클라이언트는
//! 이 trait 뒤의 블랙박스이며, 구현체는 모든 호출에 유한한 타임아웃을
//! 적용해야 합니다. 타임아웃된 호출은 성공으로 간주하지 않습니다.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{LeverageType, TradeSide};

// =============================================================================
// 에러 타입
// =============================================================================

/// 게이트웨이 에러.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 요청 시간 초과 (성공 여부 불명 - 실패로 취급)
    #[error("요청 시간 초과: {0}")]
    Timeout(String),

    /// 인증 실패
    #[error("인증 실패: {0}")]
    Authentication(String),

    /// 거래소 API 에러
    #[error("API 에러: {0}")]
    Api(String),

    /// 레이트 리밋 초과
    #[error("레이트 리밋 초과: {0}")]
    RateLimited(String),

    /// 거래소에 없는 심볼
    #[error("지원하지 않는 심볼: {0}")]
    UnknownSymbol(String),
}

// =============================================================================
// 거래소 중립 타입
// =============================================================================

/// 계정 포지션 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionMode {
    /// 심볼당 포지션 1개 (롱/숏 중 하나)
    OneWay,
    /// 롱/숏 동시 보유 가능
    Hedge,
}

impl std::fmt::Display for PositionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionMode::OneWay => write!(f, "ONE_WAY"),
            PositionMode::Hedge => write!(f, "HEDGE"),
        }
    }
}

/// 주문 방향 (거래소 관점의 매수/매도).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// 포지션 방향을 진입 주문 방향으로 변환.
    pub fn to_open(side: TradeSide) -> Self {
        match side {
            TradeSide::Long => OrderSide::Buy,
            TradeSide::Short => OrderSide::Sell,
        }
    }

    /// 포지션 방향을 청산 주문 방향으로 변환.
    pub fn to_close(side: TradeSide) -> Self {
        match side {
            TradeSide::Long => OrderSide::Sell,
            TradeSide::Short => OrderSide::Buy,
        }
    }
}

/// 거래소가 보고한 포지션.
///
/// `amount`는 부호 있는 수량입니다 (롱 양수, 숏 음수).
/// 헤지 모드에서는 `position_side`로 롱/숏 슬롯이 구분됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    /// 선물 심볼
    pub symbol: String,
    /// 부호 있는 포지션 수량
    pub amount: Decimal,
    /// 평균 진입가
    pub entry_price: Decimal,
    /// 헤지 모드 포지션 슬롯 (원웨이 모드에서는 None)
    pub position_side: Option<TradeSide>,
}

impl PositionInfo {
    /// 포지션 보유 여부.
    pub fn is_open(&self) -> bool {
        !self.amount.is_zero()
    }

    /// 포지션 방향. 플랫이면 None.
    pub fn side(&self) -> Option<TradeSide> {
        if self.amount.is_zero() {
            None
        } else if let Some(tagged) = self.position_side {
            Some(tagged)
        } else if self.amount > Decimal::ZERO {
            Some(TradeSide::Long)
        } else {
            Some(TradeSide::Short)
        }
    }

    /// 절대 수량.
    pub fn quantity(&self) -> Decimal {
        self.amount.abs()
    }
}

/// 심볼 정밀도 규칙.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    /// 수량 최소 단위 (LOT_SIZE stepSize)
    pub step_size: Decimal,
    /// 최소 주문 명목가 (MIN_NOTIONAL)
    pub min_notional: Decimal,
    /// 가격 최소 단위 (PRICE_FILTER tickSize)
    pub tick_size: Decimal,
}

impl Default for SymbolFilters {
    fn default() -> Self {
        Self {
            step_size: Decimal::new(1, 3),   // 0.001
            min_notional: Decimal::from(5),
            tick_size: Decimal::new(1, 2),   // 0.01
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FuturesOrderType {
    /// 시장가
    Market,
    /// 스톱 시장가 (손절)
    StopMarket,
}

/// 주문 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesOrderRequest {
    /// 선물 심볼
    pub symbol: String,
    /// 매수/매도
    pub side: OrderSide,
    /// 주문 유형
    pub order_type: FuturesOrderType,
    /// 주문 수량
    pub quantity: Decimal,
    /// 스톱 트리거 가격 (StopMarket 전용)
    pub stop_price: Option<Decimal>,
    /// 포지션 축소 전용 여부
    pub reduce_only: bool,
    /// 트리거 시 전량 청산 (StopMarket 전용)
    pub close_position: bool,
    /// 헤지 모드 포지션 슬롯 태그
    pub position_side: Option<TradeSide>,
}

impl FuturesOrderRequest {
    /// 시장가 주문 생성.
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: FuturesOrderType::Market,
            quantity,
            stop_price: None,
            reduce_only: false,
            close_position: false,
            position_side: None,
        }
    }

    /// 스톱 시장가 주문 생성 (손절용, 트리거 시 전량 청산).
    pub fn stop_market(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: FuturesOrderType::StopMarket,
            quantity,
            stop_price: Some(stop_price),
            reduce_only: true,
            close_position: true,
            position_side: None,
        }
    }

    /// 헤지 모드 포지션 슬롯 태그 설정 (빌더 패턴).
    pub fn with_position_side(mut self, side: TradeSide) -> Self {
        self.position_side = Some(side);
        self
    }

    /// reduce-only 설정 (빌더 패턴).
    pub fn reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }
}

/// 주문 응답.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesOrderResponse {
    /// 거래소 주문번호
    pub order_id: String,
    /// 평균 체결가 (거래소가 제공하는 경우)
    pub avg_price: Option<Decimal>,
}

// =============================================================================
// FuturesGateway Trait
// =============================================================================

/// 선물 거래소 게이트웨이 trait.
///
/// 엔진이 거래소에 기대하는 전체 표면입니다. 실거래 구현체와
/// `MockFuturesGateway`가 동일한 인터페이스를 제공합니다.
///
/// # 구현 예시
///
/// ```ignore
/// pub struct BinanceFuturesGateway {
///     client: Arc<BinanceClient>,
/// }
///
/// #[async_trait]
/// impl FuturesGateway for BinanceFuturesGateway {
///     async fn place_order(&self, request: &FuturesOrderRequest)
///         -> Result<FuturesOrderResponse, GatewayError> {
///         // /fapi/v1/order 호출 및 변환
///     }
///     // ... 나머지 메서드 구현
/// }
/// ```
#[async_trait]
pub trait FuturesGateway: Send + Sync {
    /// 주문 제출.
    ///
    /// # Errors
    ///
    /// - `GatewayError::Api`: 거래소 주문 거부 (증거금 부족 등)
    /// - `GatewayError::Timeout`: 응답 없음 - 체결 여부 불명, 실패로 취급
    /// - `GatewayError::Network`: 네트워크 연결 실패
    async fn place_order(
        &self,
        request: &FuturesOrderRequest,
    ) -> Result<FuturesOrderResponse, GatewayError>;

    /// 심볼의 포지션 조회.
    ///
    /// 원웨이 모드에서는 최대 1개, 헤지 모드에서는 롱/숏 슬롯별로
    /// 반환됩니다. 플랫 슬롯(amount == 0)도 포함될 수 있습니다.
    async fn fetch_positions(&self, symbol: &str) -> Result<Vec<PositionInfo>, GatewayError>;

    /// 레버리지 설정.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;

    /// 마진 타입 설정.
    ///
    /// 이미 동일한 타입이면 거래소가 에러를 반환할 수 있습니다.
    /// 호출자는 이 에러를 치명적이지 않은 것으로 취급합니다.
    async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: LeverageType,
    ) -> Result<(), GatewayError>;

    /// 계정 포지션 모드 조회.
    async fn position_mode(&self) -> Result<PositionMode, GatewayError>;

    /// 심볼 정밀도 규칙 조회.
    ///
    /// # Errors
    ///
    /// - `GatewayError::UnknownSymbol`: 거래소에 없는 심볼
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, GatewayError>;

    /// 마크가격 조회.
    async fn mark_price(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    /// 거래소 이름 (로깅용).
    fn exchange_name(&self) -> &str;
}
