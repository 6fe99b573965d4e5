//! Mock 선물 거래소 FuturesGateway 구현.
//!
//! 실제 거래소 없이 엔진/리컨실러의 동작을 검증하는 가상 거래소입니다.
//! 시장가 주문은 설정된 마크가격에 즉시 체결되며, 포지션 상태는
//! 원웨이/헤지 모드 규칙에 따라 갱신됩니다.
//!
//! # 거래소 중립성
//!
//! Mock 거래소는 실거래 게이트웨이와 동일한 `FuturesGateway` 인터페이스를
//! 제공합니다. 엔진 코드는 주문이 어디로 가는지 알지 못합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use tvtrader_core::{
    FuturesGateway, FuturesOrderRequest, FuturesOrderResponse, FuturesOrderType, GatewayError,
    LeverageType, OrderSide, PositionInfo, PositionMode, SymbolFilters, TradeSide,
};

/// 포지션 슬롯 키.
///
/// 원웨이 모드는 심볼당 슬롯 하나(`side == None`), 헤지 모드는
/// 롱/숏 슬롯이 분리됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    symbol: String,
    side: Option<TradeSide>,
}

/// 포지션 슬롯 상태.
#[derive(Debug, Clone, Default)]
struct Slot {
    /// 부호 있는 수량 (원웨이), 헤지 슬롯은 항상 양수
    amount: Decimal,
    /// 평균 진입가
    entry_price: Decimal,
}

/// Mock 거래소 내부 상태.
struct MockState {
    mode: PositionMode,
    mark_prices: HashMap<String, Decimal>,
    filters: HashMap<String, SymbolFilters>,
    slots: HashMap<SlotKey, Slot>,
    leverage: HashMap<String, u32>,
    margin_type: HashMap<String, LeverageType>,
    orders: Vec<FuturesOrderRequest>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            mode: PositionMode::OneWay,
            mark_prices: HashMap::new(),
            filters: HashMap::new(),
            slots: HashMap::new(),
            leverage: HashMap::new(),
            margin_type: HashMap::new(),
            orders: Vec::new(),
        }
    }
}

/// Mock 선물 거래소.
///
/// 테스트에서 시나리오를 구성하는 헬퍼를 제공합니다:
///
/// ```ignore
/// let gateway = MockFuturesGateway::new();
/// gateway.set_mark_price("BTCUSDT", dec!(50000)).await;
/// gateway.set_position_mode(PositionMode::Hedge).await;
/// gateway.fail_next_orders(true);
/// ```
pub struct MockFuturesGateway {
    state: RwLock<MockState>,
    next_order_id: AtomicU64,
    /// 주문 제출 강제 실패 스위치
    fail_orders: AtomicBool,
    /// 스톱 주문만 강제 실패 스위치
    fail_stop_orders: AtomicBool,
    /// 포지션 조회 강제 실패 스위치
    fail_position_queries: AtomicBool,
}

impl Default for MockFuturesGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFuturesGateway {
    /// 빈 상태의 Mock 거래소 생성.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState::default()),
            next_order_id: AtomicU64::new(1),
            fail_orders: AtomicBool::new(false),
            fail_stop_orders: AtomicBool::new(false),
            fail_position_queries: AtomicBool::new(false),
        }
    }

    /// 계정 포지션 모드 설정.
    pub async fn set_position_mode(&self, mode: PositionMode) {
        self.state.write().await.mode = mode;
    }

    /// 심볼 마크가격 설정. 설정된 심볼만 "상장된" 심볼로 취급됩니다.
    pub async fn set_mark_price(&self, symbol: impl Into<String>, price: Decimal) {
        self.state.write().await.mark_prices.insert(symbol.into(), price);
    }

    /// 심볼 정밀도 규칙 설정 (미설정 시 기본값 사용).
    pub async fn set_symbol_filters(&self, symbol: impl Into<String>, filters: SymbolFilters) {
        self.state.write().await.filters.insert(symbol.into(), filters);
    }

    /// 포지션 직접 설정 (드리프트 시나리오 구성용).
    ///
    /// 원웨이 모드용입니다. 롱은 양수, 숏은 음수 수량을 넣습니다.
    pub async fn set_position(
        &self,
        symbol: impl Into<String>,
        amount: Decimal,
        entry_price: Decimal,
    ) {
        let key = SlotKey {
            symbol: symbol.into(),
            side: None,
        };
        let mut state = self.state.write().await;
        if amount.is_zero() {
            state.slots.remove(&key);
        } else {
            state.slots.insert(key, Slot { amount, entry_price });
        }
    }

    /// 헤지 모드 슬롯 포지션 직접 설정.
    pub async fn set_hedge_position(
        &self,
        symbol: impl Into<String>,
        side: TradeSide,
        quantity: Decimal,
        entry_price: Decimal,
    ) {
        let key = SlotKey {
            symbol: symbol.into(),
            side: Some(side),
        };
        let mut state = self.state.write().await;
        if quantity.is_zero() {
            state.slots.remove(&key);
        } else {
            state.slots.insert(
                key,
                Slot {
                    amount: quantity,
                    entry_price,
                },
            );
        }
    }

    /// 모든 포지션 제거.
    pub async fn clear_positions(&self) {
        self.state.write().await.slots.clear();
    }

    /// 지금까지 제출된 주문 목록.
    pub async fn submitted_orders(&self) -> Vec<FuturesOrderRequest> {
        self.state.read().await.orders.clone()
    }

    /// 심볼에 설정된 레버리지 조회.
    pub async fn leverage_of(&self, symbol: &str) -> Option<u32> {
        self.state.read().await.leverage.get(symbol).copied()
    }

    /// 심볼에 설정된 마진 타입 조회.
    pub async fn margin_type_of(&self, symbol: &str) -> Option<LeverageType> {
        self.state.read().await.margin_type.get(symbol).copied()
    }

    /// 이후 주문 제출을 강제 실패시킴.
    pub fn fail_next_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    /// 이후 스톱 주문만 강제 실패시킴 (시장가 주문은 정상 체결).
    pub fn fail_next_stop_orders(&self, fail: bool) {
        self.fail_stop_orders.store(fail, Ordering::SeqCst);
    }

    /// 이후 포지션 조회를 강제 실패시킴.
    pub fn fail_position_queries(&self, fail: bool) {
        self.fail_position_queries.store(fail, Ordering::SeqCst);
    }

    /// 시장가 주문을 포지션 슬롯에 반영.
    ///
    /// 원웨이: 부호 있는 수량 가감. reduce-only는 기존 수량을 넘어
    /// 반대 방향으로 뒤집지 않도록 클램프합니다.
    /// 헤지: `position_side` 슬롯에 대해 진입은 증가, 청산은 감소.
    fn apply_market_fill(state: &mut MockState, request: &FuturesOrderRequest, fill_price: Decimal) {
        let signed = match request.side {
            OrderSide::Buy => request.quantity,
            OrderSide::Sell => -request.quantity,
        };

        let key = match state.mode {
            PositionMode::OneWay => SlotKey {
                symbol: request.symbol.clone(),
                side: None,
            },
            PositionMode::Hedge => SlotKey {
                symbol: request.symbol.clone(),
                side: request.position_side,
            },
        };

        let (previous, previous_entry) = state
            .slots
            .get(&key)
            .map(|slot| (slot.amount, slot.entry_price))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        let delta = match state.mode {
            PositionMode::OneWay => {
                if request.reduce_only {
                    // 기존 포지션 범위 내에서만 축소
                    if previous > Decimal::ZERO {
                        signed.max(-previous)
                    } else {
                        signed.min(-previous)
                    }
                } else {
                    signed
                }
            }
            PositionMode::Hedge => {
                // 헤지 슬롯 수량은 항상 양수. 진입 방향 주문이면 증가, 아니면 감소.
                let is_entry = match key.side {
                    Some(side) => request.side == OrderSide::to_open(side),
                    None => true,
                };
                if is_entry {
                    request.quantity
                } else {
                    (-request.quantity).max(-previous)
                }
            }
        };

        let updated = previous + delta;
        if updated.is_zero() {
            state.slots.remove(&key);
            return;
        }

        // 같은 방향 증가 시 평균 단가 재계산, 방향 전환/신규 진입 시 체결가 사용
        let entry_price = if previous.is_zero()
            || previous.is_sign_positive() != updated.is_sign_positive()
        {
            fill_price
        } else if updated.abs() > previous.abs() {
            let total = previous_entry * previous.abs() + fill_price * delta.abs();
            total / updated.abs()
        } else {
            previous_entry
        };

        state.slots.insert(
            key,
            Slot {
                amount: updated,
                entry_price,
            },
        );
    }
}

#[async_trait]
impl FuturesGateway for MockFuturesGateway {
    async fn place_order(
        &self,
        request: &FuturesOrderRequest,
    ) -> Result<FuturesOrderResponse, GatewayError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(GatewayError::Api("주문 거부 (테스트 설정)".to_string()));
        }
        if request.order_type == FuturesOrderType::StopMarket
            && self.fail_stop_orders.load(Ordering::SeqCst)
        {
            return Err(GatewayError::Api("스톱 주문 거부 (테스트 설정)".to_string()));
        }

        let mut state = self.state.write().await;

        let mark = *state
            .mark_prices
            .get(&request.symbol)
            .ok_or_else(|| GatewayError::UnknownSymbol(request.symbol.clone()))?;

        state.orders.push(request.clone());

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);

        match request.order_type {
            FuturesOrderType::Market => {
                Self::apply_market_fill(&mut state, request, mark);
                debug!(
                    symbol = %request.symbol,
                    side = ?request.side,
                    quantity = %request.quantity,
                    fill_price = %mark,
                    "Mock 시장가 체결"
                );
                Ok(FuturesOrderResponse {
                    order_id: order_id.to_string(),
                    avg_price: Some(mark),
                })
            }
            FuturesOrderType::StopMarket => {
                // 스톱 주문은 등록만 하고 트리거는 시뮬레이션하지 않음
                debug!(
                    symbol = %request.symbol,
                    stop_price = ?request.stop_price,
                    "Mock 스톱 주문 등록"
                );
                Ok(FuturesOrderResponse {
                    order_id: order_id.to_string(),
                    avg_price: None,
                })
            }
        }
    }

    async fn fetch_positions(&self, symbol: &str) -> Result<Vec<PositionInfo>, GatewayError> {
        if self.fail_position_queries.load(Ordering::SeqCst) {
            return Err(GatewayError::Network(
                "포지션 조회 실패 (테스트 설정)".to_string(),
            ));
        }

        let state = self.state.read().await;
        let positions = state
            .slots
            .iter()
            .filter(|(key, _)| key.symbol == symbol)
            .map(|(key, slot)| {
                let amount = match key.side {
                    // 헤지 숏 슬롯은 음수 수량으로 보고
                    Some(TradeSide::Short) => -slot.amount,
                    _ => slot.amount,
                };
                PositionInfo {
                    symbol: key.symbol.clone(),
                    amount,
                    entry_price: slot.entry_price,
                    position_side: key.side,
                }
            })
            .collect();
        Ok(positions)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        self.state
            .write()
            .await
            .leverage
            .insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: LeverageType,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        // 실거래소처럼 동일 타입 재설정은 에러
        if state.margin_type.get(symbol) == Some(&margin_type) {
            return Err(GatewayError::Api(format!(
                "마진 타입 변경 불필요: {} 이미 {}",
                symbol, margin_type
            )));
        }
        state.margin_type.insert(symbol.to_string(), margin_type);
        Ok(())
    }

    async fn position_mode(&self) -> Result<PositionMode, GatewayError> {
        Ok(self.state.read().await.mode)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, GatewayError> {
        let state = self.state.read().await;
        if !state.mark_prices.contains_key(symbol) {
            return Err(GatewayError::UnknownSymbol(symbol.to_string()));
        }
        Ok(state.filters.get(symbol).copied().unwrap_or_default())
    }

    async fn mark_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        self.state
            .read()
            .await
            .mark_prices
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))
    }

    fn exchange_name(&self) -> &str {
        "MockFutures"
    }
}
