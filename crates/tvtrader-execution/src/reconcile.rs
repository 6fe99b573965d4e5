//! 포지션 리컨실레이션 루프.
//!
//! 시그널 트래픽과 무관하게 고정 주기로 활성 봇들을 순회하며 로컬
//! 캐시와 거래소 포지션의 드리프트를 교정합니다. 수동 청산, 강제 청산,
//! 손절 체결처럼 엔진 밖에서 일어난 변화를 흡수하는 장치입니다.
//!
//! 판정 케이스:
//!
//! 1. 거래소 플랫, 로컬 포지션 있음 → 로컬 포지션 필드 초기화
//! 2. 거래소 포지션 있음, 로컬 없음 → 거래소 방향/진입가 채택
//! 3. 양쪽 다 있으나 방향 불일치 → 거래소 우선
//! 4. 거래소 플랫인데 원장의 OPEN이 CLOSE보다 많음 → 합성 CLOSE 기록
//!    으로 원장 불변식 복원
//!
//! 추가로 중단된 플립(`PendingFlip` 마커)의 진입 레그를 재개합니다.
//! 봇별 에러는 격리되어 다른 봇 처리를 중단시키지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tvtrader_core::{
    to_futures_symbol, Bot, FuturesGateway, FuturesOrderRequest, OrderSide, TradeKind,
    TradeRecord,
};
use tvtrader_ledger::{compute_profit, BotStore, TradeStore};

use crate::engine::{apply_profit, EngineError};
use crate::guard::SignalGuard;

/// 기본 리컨실레이션 주기 (30초).
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// 봇 간 처리 간격 (거래소 레이트 리밋 보호).
pub const DEFAULT_INTER_BOT_DELAY: Duration = Duration::from_millis(50);

/// 포지션 리컨실러.
pub struct Reconciler {
    gateway: Arc<dyn FuturesGateway>,
    trades: Arc<dyn TradeStore>,
    bots: Arc<dyn BotStore>,
    guard: Arc<SignalGuard>,
    interval: Duration,
    inter_bot_delay: Duration,
}

impl Reconciler {
    /// 리컨실러 생성. `guard`는 엔진과 공유해야 합니다 - 처리 중인
    /// 시그널과 같은 봇을 동시에 만지지 않기 위한 장치입니다.
    pub fn new(
        gateway: Arc<dyn FuturesGateway>,
        trades: Arc<dyn TradeStore>,
        bots: Arc<dyn BotStore>,
        guard: Arc<SignalGuard>,
    ) -> Self {
        Self {
            gateway,
            trades,
            bots,
            guard,
            interval: DEFAULT_RECONCILE_INTERVAL,
            inter_bot_delay: DEFAULT_INTER_BOT_DELAY,
        }
    }

    /// 주기 설정 (빌더 패턴).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 봇 간 간격 설정 (빌더 패턴).
    pub fn with_inter_bot_delay(mut self, delay: Duration) -> Self {
        self.inter_bot_delay = delay;
        self
    }

    /// 취소될 때까지 주기 실행.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // 첫 tick은 즉시 발화하므로 한 번 소비
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "리컨실레이션 루프 시작");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("리컨실레이션 루프 종료");
                    break;
                }
                _ = ticker.tick() => {
                    self.reconcile_once().await;
                }
            }
        }
    }

    /// 한 패스 실행. 교정된 봇 수를 반환합니다.
    ///
    /// 타이머 외에 온디맨드 호출도 안전합니다.
    pub async fn reconcile_once(&self) -> usize {
        let bots = match self.bots.list_active().await {
            Ok(bots) => bots,
            Err(e) => {
                warn!(error = %e, "활성 봇 목록 조회 실패 - 패스 건너뜀");
                return 0;
            }
        };

        let mut corrected = 0;
        for mut bot in bots {
            // 시그널 처리 중인 봇은 건드리지 않고 다음 패스로 넘김
            let Some(_permit) = self.guard.try_enter_maintenance(bot.id).await else {
                debug!(bot_id = bot.id, "시그널 처리 중 - 리컨실 건너뜀");
                continue;
            };

            match self.reconcile_bot(&mut bot).await {
                Ok(true) => {
                    corrected += 1;
                    if let Err(e) = self.bots.update(&bot).await {
                        warn!(bot_id = bot.id, error = %e, "교정 상태 저장 실패");
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(bot_id = bot.id, error = %e, "리컨실 실패 - 다음 봇 계속");
                }
            }

            tokio::time::sleep(self.inter_bot_delay).await;
        }

        if corrected > 0 {
            info!(corrected, "리컨실레이션 패스 완료");
        }
        corrected
    }

    /// 봇 하나 리컨실. 상태가 변경되었으면 `true`.
    async fn reconcile_bot(&self, bot: &mut Bot) -> Result<bool, EngineError> {
        let Some(symbol) = to_futures_symbol(&bot.pair) else {
            warn!(bot_id = bot.id, pair = %bot.pair, "페어 변환 불가 - 건너뜀");
            return Ok(false);
        };

        let mut changed = false;

        if bot.pending_flip.is_some() {
            changed |= self.resume_pending_flip(bot, &symbol).await?;
        }

        let positions = self.gateway.fetch_positions(&symbol).await?;
        let exchange_position = positions.iter().find(|p| p.is_open());

        match exchange_position {
            None => {
                // 케이스 4: 원장에 미청산 OPEN이 남아 있으면 합성 CLOSE
                let trades = self.trades.list_by_bot(bot.id).await?;
                if let Some(lot) = oldest_unmatched_open(&trades) {
                    let close_price = match self.gateway.mark_price(&symbol).await {
                        Ok(mark) => mark,
                        // 마크가격 조회 실패 시 마지막으로 알려진 가격(진입가)
                        Err(_) => lot.price,
                    };
                    info!(
                        bot_id = bot.id,
                        %symbol,
                        side = %lot.side,
                        quantity = %lot.quantity,
                        price = %close_price,
                        "외부 청산 감지 - 합성 CLOSE 기록"
                    );
                    let record = TradeRecord::new(
                        bot.id,
                        format!("RECON_{}", lot.seq),
                        TradeKind::Close,
                        lot.side,
                        close_price,
                        lot.quantity,
                        symbol.clone(),
                    );
                    self.trades.append(record).await?;
                    bot.trades += 1;
                    self.refresh_profit(bot, &symbol).await?;
                    changed = true;
                }

                // 케이스 1: 로컬 포지션 필드 정리 (불변식 위반 상태도 복원)
                if bot.position.as_side().is_some() || !bot.position_fields_consistent() {
                    info!(bot_id = bot.id, %symbol, "거래소 플랫 - 로컬 포지션 초기화");
                    bot.clear_position();
                    changed = true;
                }
            }
            Some(position) => {
                let Some(exchange_side) = position.side() else {
                    return Ok(changed);
                };

                match bot.position.as_side() {
                    // 케이스 2: 로컬이 플랫 - 거래소 포지션 채택
                    None => {
                        info!(
                            bot_id = bot.id,
                            %symbol,
                            side = %exchange_side,
                            entry_price = %position.entry_price,
                            "로컬 미추적 포지션 발견 - 거래소 상태 채택"
                        );
                        bot.adopt_position(exchange_side, position.entry_price);
                        self.refresh_profit(bot, &symbol).await?;
                        changed = true;
                    }
                    // 케이스 3: 방향 불일치 - 거래소 우선
                    Some(local_side) if local_side != exchange_side => {
                        warn!(
                            bot_id = bot.id,
                            %symbol,
                            local = %local_side,
                            exchange = %exchange_side,
                            "포지션 방향 불일치 - 거래소 상태로 덮어씀"
                        );
                        bot.adopt_position(exchange_side, position.entry_price);
                        self.refresh_profit(bot, &symbol).await?;
                        changed = true;
                    }
                    // 일치: 진입가 캐시만 최신화
                    Some(_) => {
                        if bot.entry_price != position.entry_price {
                            bot.entry_price = position.entry_price;
                            changed = true;
                        }
                    }
                }
            }
        }

        Ok(changed)
    }

    /// 중단된 플립 재개. 남은 레그(청산/진입)를 순서대로 마저 실행합니다.
    async fn resume_pending_flip(&self, bot: &mut Bot, symbol: &str) -> Result<bool, EngineError> {
        // 위의 is_some 검사로 항상 Some
        let Some(flip) = bot.pending_flip.clone() else {
            return Ok(false);
        };

        let positions = self.gateway.fetch_positions(symbol).await?;
        let target_open = positions
            .iter()
            .any(|p| p.is_open() && p.side() == Some(flip.target));

        if target_open {
            // 진입 레그까지 완료된 플립 - 마커만 정리
            info!(bot_id = bot.id, %symbol, "완료된 플립 마커 정리");
            bot.pending_flip = None;
            return Ok(true);
        }

        // 청산 레그 전에 중단된 플립: 기존 반대 방향 포지션이 아직 열려 있음.
        // 원웨이 계정에서 진입 주문은 기존 포지션과 상계되므로 청산 레그부터
        // 마저 실행한다.
        if let Some(leftover) = positions
            .iter()
            .find(|p| p.is_open() && p.side() == Some(flip.target.opposite()))
        {
            let close_side = flip.target.opposite();
            let close_quantity = leftover.quantity();

            info!(
                bot_id = bot.id,
                %symbol,
                closed_side = %close_side,
                quantity = %close_quantity,
                "중단된 플립 재개 - 청산 레그 제출"
            );

            let request = FuturesOrderRequest::market(
                symbol,
                OrderSide::to_close(close_side),
                close_quantity,
            )
            .reduce_only(true);
            let response = self.gateway.place_order(&request).await?;
            let close_price = match response.avg_price {
                Some(price) => price,
                None => self.gateway.mark_price(symbol).await?,
            };

            let record = TradeRecord::new(
                bot.id,
                response.order_id,
                TradeKind::Close,
                close_side,
                close_price,
                close_quantity,
                symbol,
            );
            self.trades.append(record).await?;
            bot.trades += 1;
        }

        info!(
            bot_id = bot.id,
            %symbol,
            target = %flip.target,
            quantity = %flip.quantity,
            "중단된 플립 재개 - 진입 레그 제출"
        );

        let request =
            FuturesOrderRequest::market(symbol, OrderSide::to_open(flip.target), flip.quantity);
        let response = self.gateway.place_order(&request).await?;
        let fill_price = response.avg_price.unwrap_or(flip.reference_price);

        let record = TradeRecord::new(
            bot.id,
            response.order_id,
            TradeKind::Open,
            flip.target,
            fill_price,
            flip.quantity,
            symbol,
        );
        self.trades.append(record).await?;
        bot.trades += 1;
        bot.adopt_position(flip.target, fill_price);
        bot.pending_flip = None;
        self.refresh_profit(bot, symbol).await?;

        Ok(true)
    }

    /// 원장 기준 손익 재계산 후 봇에 반영.
    async fn refresh_profit(&self, bot: &mut Bot, symbol: &str) -> Result<(), EngineError> {
        let trades = self.trades.list_by_bot(bot.id).await?;
        let mark = self.gateway.mark_price(symbol).await.ok();
        let report = compute_profit(bot.start_balance, &trades, mark);
        apply_profit(bot, &report);
        Ok(())
    }
}

/// 가장 오래된 미매칭 OPEN 기록.
///
/// 원장을 `seq` 오름차순으로 재생하며 FIFO 매칭했을 때 큐 맨 앞에
/// 남는 lot입니다. 합성 CLOSE의 방향/수량 근거가 됩니다.
fn oldest_unmatched_open(trades: &[TradeRecord]) -> Option<&TradeRecord> {
    let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
    ordered.sort_by_key(|t| t.seq);

    let mut queue: std::collections::VecDeque<&TradeRecord> = std::collections::VecDeque::new();
    for trade in ordered {
        match trade.kind {
            TradeKind::Open => queue.push_back(trade),
            TradeKind::Close => {
                queue.pop_front();
            }
        }
    }
    queue.front().copied()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tvtrader_core::TradeSide;

    use super::*;

    fn record(seq: i64, kind: TradeKind, side: TradeSide, price: Decimal) -> TradeRecord {
        let mut r = TradeRecord::new(1, format!("ORD_{}", seq), kind, side, price, dec!(0.002), "BTCUSDT");
        r.seq = seq;
        r
    }

    #[test]
    fn test_oldest_unmatched_open() {
        let trades = vec![
            record(1, TradeKind::Open, TradeSide::Long, dec!(100)),
            record(2, TradeKind::Close, TradeSide::Long, dec!(110)),
            record(3, TradeKind::Open, TradeSide::Short, dec!(120)),
        ];
        let lot = oldest_unmatched_open(&trades).unwrap();
        assert_eq!(lot.seq, 3);
        assert_eq!(lot.side, TradeSide::Short);
    }

    #[test]
    fn test_balanced_ledger_has_no_unmatched_open() {
        let trades = vec![
            record(1, TradeKind::Open, TradeSide::Long, dec!(100)),
            record(2, TradeKind::Close, TradeSide::Long, dec!(110)),
        ];
        assert!(oldest_unmatched_open(&trades).is_none());
        assert!(oldest_unmatched_open(&[]).is_none());
    }
}
