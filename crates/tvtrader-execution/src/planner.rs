//! 주문 플래너.
//!
//! 시그널, 거래소 포지션 모드, 거래소가 보고한 실제 포지션으로부터
//! 실행할 주문 계획을 결정합니다. 로컬 캐시가 아닌 거래소 조회 결과만
//! 판단 근거로 사용합니다 (캐시는 표시용).
//!
//! 수량 계산도 여기서 수행합니다: `레버리지 × 기준금액 / 기준가`를
//! 거래소 lot step으로 내림하고, 최소 명목가 미달 시 최소 체결 가능
//! 수량까지 올립니다.

use rust_decimal::Decimal;
use thiserror::Error;

use tvtrader_core::{
    round_down_to_step, PositionInfo, PositionMode, SignalAction, SymbolFilters, TradeSide,
};

/// 시그널 거부 사유.
///
/// 거부는 주문 제출 전에 동기적으로 판정되며 원장에 아무것도 쓰지
/// 않습니다.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    /// 청산할 포지션 없음
    #[error("청산할 포지션이 없습니다")]
    NoPositionToClose,

    /// 같은 방향 포지션 이미 보유
    #[error("이미 {0} 포지션이 있습니다")]
    AlreadyOpen(TradeSide),

    /// 계산된 수량이 거래소 최소 기준 미달
    #[error("주문 수량이 최소 기준 미달입니다 (수량 {quantity}, 최소 명목가 {min_notional})")]
    QuantityTooSmall {
        quantity: Decimal,
        min_notional: Decimal,
    },

    /// 페어를 선물 심볼로 변환 불가
    #[error("유효하지 않은 페어: {0}")]
    InvalidPair(String),

    /// 거래소에 없는 심볼
    #[error("거래소에 없는 심볼: {0}")]
    UnknownSymbol(String),

    /// 봇 일시정지 중
    #[error("봇이 일시정지 상태입니다")]
    BotPaused,

    /// 같은 봇의 시그널 처리 중
    #[error("이전 시그널 처리 중입니다")]
    Busy,

    /// 쿨다운 중
    #[error("쿨다운 중입니다 ({wait_ms}ms 남음)")]
    CooldownActive { wait_ms: u64 },
}

/// 주문 계획.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderPlan {
    /// 신규 진입.
    Open { side: TradeSide, quantity: Decimal },
    /// 전량 청산. `side`는 청산되는 포지션의 방향.
    Close { side: TradeSide, quantity: Decimal },
    /// 반대 방향 전환 (원웨이 전용): 청산 후 진입, 순차 실행.
    Flip {
        close_side: TradeSide,
        close_quantity: Decimal,
        open_side: TradeSide,
        open_quantity: Decimal,
    },
}

/// 수량 계산 입력.
#[derive(Debug, Clone)]
pub struct SizingInput {
    /// 레버리지 배수
    pub leverage: u32,
    /// 사이징 기준 금액 (quote 통화)
    pub basis: Decimal,
    /// 기준가 (지정가 또는 마크가격)
    pub reference_price: Decimal,
    /// 심볼 정밀도 규칙
    pub filters: SymbolFilters,
}

/// 값을 step의 배수로 올림.
fn round_up_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).ceil() * step).normalize()
}

/// 신규 진입 수량 계산.
///
/// `레버리지 × 기준금액 / 기준가`를 lot step으로 내림합니다.
/// 명목가(수량 × 가격)가 최소 명목가 미달이면 `(최소 명목가 + 1) / 기준가`를
/// step으로 올림한 수량으로 보정합니다. 보정은 최소 명목가가
/// `레버리지 × 기준금액` 이내일 때만 허용되며, 그 외에는 거부합니다.
pub fn entry_quantity(input: &SizingInput) -> Result<Decimal, RejectReason> {
    let SizingInput {
        leverage,
        basis,
        reference_price,
        filters,
    } = input;

    if reference_price.is_zero() {
        return Err(RejectReason::QuantityTooSmall {
            quantity: Decimal::ZERO,
            min_notional: filters.min_notional,
        });
    }

    let sized_notional = Decimal::from(*leverage) * *basis;
    let raw = sized_notional / *reference_price;
    let mut quantity = round_down_to_step(raw, filters.step_size);

    if quantity * *reference_price < filters.min_notional {
        // 사이징 기준 금액보다 큰 최소 명목가는 보정 대상이 아님
        if filters.min_notional > sized_notional {
            return Err(RejectReason::QuantityTooSmall {
                quantity,
                min_notional: filters.min_notional,
            });
        }
        let target = (filters.min_notional + Decimal::ONE) / *reference_price;
        quantity = round_up_to_step(target, filters.step_size);
    }

    if quantity.is_zero() || quantity * *reference_price < filters.min_notional {
        return Err(RejectReason::QuantityTooSmall {
            quantity,
            min_notional: filters.min_notional,
        });
    }

    Ok(quantity)
}

/// 원웨이 모드에서 유일한 보유 포지션.
fn one_way_position(positions: &[PositionInfo]) -> Option<&PositionInfo> {
    positions.iter().find(|p| p.is_open())
}

/// 헤지 모드에서 지정 방향 슬롯의 포지션.
fn hedge_slot(positions: &[PositionInfo], side: TradeSide) -> Option<&PositionInfo> {
    positions
        .iter()
        .find(|p| p.is_open() && p.side() == Some(side))
}

/// 시그널 → 주문 계획 결정.
///
/// `entry_qty`는 진입 수량이 실제로 필요한 경우에만 호출됩니다
/// ("이미 보유" 거부가 수량 거부보다 우선).
pub fn plan_signal<F>(
    action: SignalAction,
    mode: PositionMode,
    positions: &[PositionInfo],
    entry_qty: F,
) -> Result<OrderPlan, RejectReason>
where
    F: FnOnce() -> Result<Decimal, RejectReason>,
{
    let Some(target) = action.target_side() else {
        // CLOSE
        let existing = match mode {
            PositionMode::OneWay => one_way_position(positions),
            // 헤지 모드: 보유 슬롯 중 첫 번째를 청산 (롱 우선)
            PositionMode::Hedge => hedge_slot(positions, TradeSide::Long)
                .or_else(|| hedge_slot(positions, TradeSide::Short)),
        };
        let existing = existing.ok_or(RejectReason::NoPositionToClose)?;
        // 보유 포지션에는 항상 방향이 있음
        let side = existing.side().ok_or(RejectReason::NoPositionToClose)?;
        return Ok(OrderPlan::Close {
            side,
            quantity: existing.quantity(),
        });
    };

    match mode {
        PositionMode::OneWay => match one_way_position(positions) {
            None => Ok(OrderPlan::Open {
                side: target,
                quantity: entry_qty()?,
            }),
            Some(existing) if existing.side() == Some(target) => {
                Err(RejectReason::AlreadyOpen(target))
            }
            Some(existing) => {
                // 반대 방향 보유: 청산 후 진입
                let close_side = existing.side().ok_or(RejectReason::NoPositionToClose)?;
                Ok(OrderPlan::Flip {
                    close_side,
                    close_quantity: existing.quantity(),
                    open_side: target,
                    open_quantity: entry_qty()?,
                })
            }
        },
        PositionMode::Hedge => {
            // 헤지 모드는 롱/숏 동시 보유 가능 - 자동 플립 없음
            if hedge_slot(positions, target).is_some() {
                return Err(RejectReason::AlreadyOpen(target));
            }
            Ok(OrderPlan::Open {
                side: target,
                quantity: entry_qty()?,
            })
        }
    }
}
