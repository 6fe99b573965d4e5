//! FIFO 손익 계산기.
//!
//! 봇의 체결 원장을 재생하여 실현/미실현 손익을 계산합니다.
//! 계산은 순수 함수이며 아무것도 쓰지 않습니다 - 같은 원장에 대해
//! 항상 같은 결과를 반환합니다. 결과 영속화 여부는 호출자가 결정합니다.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use tvtrader_core::{TradeKind, TradeRecord, TradeSide};

/// 손익 계산 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitReport {
    /// 실현 손익 (quote 통화)
    pub realized_pnl: Decimal,
    /// 미실현 손익 (마크가격 미제공 시 0 - "포지션 없음"을 의미하지 않음)
    pub unrealized_pnl: Decimal,
    /// 총 손익 (실현 + 미실현)
    pub total_pnl: Decimal,
    /// 시작 잔고 대비 손익률 (%)
    pub percentage: Decimal,
    /// 미청산 lot 수
    pub open_lots: usize,
    /// 매칭할 OPEN이 없었던 CLOSE 수 (원장 정합성 이상 진단용)
    pub unmatched_closes: usize,
}

impl ProfitReport {
    /// 빈 원장에 대한 결과.
    pub fn empty() -> Self {
        Self {
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            percentage: Decimal::ZERO,
            open_lots: 0,
            unmatched_closes: 0,
        }
    }
}

/// 방향별 손익 공식.
///
/// 롱: (청산가 - 진입가) × 수량, 숏: (진입가 - 청산가) × 수량.
fn directional_pnl(side: TradeSide, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    match side {
        TradeSide::Long => (exit - entry) * quantity,
        TradeSide::Short => (entry - exit) * quantity,
    }
}

/// FIFO 손익 계산.
///
/// 원장을 `seq` 오름차순으로 재생하면서 미매칭 OPEN lot 큐를 유지합니다.
///
/// - OPEN: 큐에 push
/// - CLOSE: 가장 오래된 미매칭 OPEN을 pop하여 실현 손익 누적.
///   청산 수량은 CLOSE 기록의 수량이 양수면 그 값, 아니면 OPEN lot의 수량.
/// - 매칭할 OPEN이 없는 CLOSE는 실현 손익에 반영하지 않되,
///   `unmatched_closes`로 집계하고 경고를 남깁니다 (원장 정합성 이상).
///
/// 스캔 후 큐에 남은 lot이 미청산 포지션이며, 마크가격이 주어지면
/// 동일한 방향 공식으로 미실현 손익을 계산합니다.
pub fn compute_profit(
    start_balance: Decimal,
    trades: &[TradeRecord],
    mark_price: Option<Decimal>,
) -> ProfitReport {
    if trades.is_empty() {
        return ProfitReport::empty();
    }

    let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
    ordered.sort_by_key(|t| t.seq);

    let mut realized = Decimal::ZERO;
    let mut unmatched_closes = 0usize;
    let mut open_lots: VecDeque<&TradeRecord> = VecDeque::new();

    for trade in ordered {
        match trade.kind {
            TradeKind::Open => open_lots.push_back(trade),
            TradeKind::Close => match open_lots.pop_front() {
                Some(lot) => {
                    let closed_qty = if trade.quantity > Decimal::ZERO {
                        trade.quantity
                    } else {
                        lot.quantity
                    };
                    realized += directional_pnl(lot.side, lot.price, trade.price, closed_qty);
                }
                None => {
                    unmatched_closes += 1;
                    warn!(
                        bot_id = trade.bot_id,
                        seq = trade.seq,
                        symbol = %trade.symbol,
                        "매칭할 OPEN이 없는 CLOSE 기록 - 원장 정합성 이상"
                    );
                }
            },
        }
    }

    let unrealized = match mark_price {
        Some(mark) => open_lots
            .iter()
            .map(|lot| directional_pnl(lot.side, lot.price, mark, lot.quantity))
            .sum(),
        None => Decimal::ZERO,
    };

    let total = realized + unrealized;
    let percentage = if start_balance.is_zero() {
        Decimal::ZERO
    } else {
        total / start_balance * Decimal::from(100)
    };

    ProfitReport {
        realized_pnl: realized,
        unrealized_pnl: unrealized,
        total_pnl: total,
        percentage,
        open_lots: open_lots.len(),
        unmatched_closes,
    }
}
