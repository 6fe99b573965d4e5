//! 시그널 실행 엔진.
//!
//! 웹훅 시그널 1건을 주문 실행까지 끝까지 처리합니다:
//! admission → 거래소 상태 조회 → 주문 계획 → 주문 제출 → 원장 기록 →
//! 손익 재계산 → 포지션 검증. 거부는 주문 제출 전에 판정되어
//! 원장에 아무것도 쓰지 않습니다.
//!
//! # 플립 복구
//!
//! 반대 방향 전환(플립)은 청산과 진입 두 주문으로 이뤄지며 원자적이지
//! 않습니다. 청산 레그 제출 전에 `PendingFlip` 마커를 봇에 영속화하고
//! 진입 레그 완료 후 제거합니다. 두 레그 사이에서 프로세스가 죽으면
//! 리컨실러가 마커를 보고 진입 레그를 재개합니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use tvtrader_core::{
    round_down_to_step, to_futures_symbol, Bot, BotId, BotStatus, FuturesGateway,
    FuturesOrderRequest, GatewayError, OrderSide, PendingFlip, PositionMode, PriceSpec,
    SymbolFilters, TradeKind, TradeRecord, TradeSide, WebhookSignal,
};
use tvtrader_ledger::{compute_profit, BotStore, LedgerError, ProfitReport, TradeStore};

use crate::guard::{Admission, SignalGuard};
use crate::planner::{entry_quantity, plan_signal, OrderPlan, RejectReason, SizingInput};

/// 플립 청산-진입 레그 사이 대기 (원장 이벤트 순서 보장용 최소 간격).
pub const DEFAULT_FLIP_PAUSE: Duration = Duration::from_millis(5);

/// 엔진 에러.
///
/// 거부(rejection)는 에러가 아니라 `SignalOutcome`으로 반환됩니다.
/// 여기의 에러는 호출자에게 HTTP 상태로 구분되어야 하는 실패입니다.
#[derive(Debug, Error)]
pub enum EngineError {
    /// 봇 없음
    #[error("봇을 찾을 수 없음: {0}")]
    BotNotFound(BotId),

    /// 웹훅 토큰 불일치
    #[error("웹훅 토큰이 유효하지 않습니다")]
    InvalidToken,

    /// 게이트웨이 에러 (주문 제출 자체 실패 등)
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// 저장소 에러
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// 시그널 처리 결과.
#[derive(Debug, Clone)]
pub struct SignalOutcome {
    /// 주문이 제출되었는지 여부
    pub accepted: bool,
    /// 거래소 주문번호 (플립이면 진입 주문)
    pub order_id: Option<String>,
    /// 체결 수량
    pub filled_quantity: Option<Decimal>,
    /// 체결가
    pub filled_price: Option<Decimal>,
    /// 거부 사유 (accepted == false일 때)
    pub reason: Option<String>,
}

impl SignalOutcome {
    fn rejected(reason: impl ToString) -> Self {
        Self {
            accepted: false,
            order_id: None,
            filled_quantity: None,
            filled_price: None,
            reason: Some(reason.to_string()),
        }
    }

    fn accepted(order_id: String, quantity: Decimal, price: Decimal) -> Self {
        Self {
            accepted: true,
            order_id: Some(order_id),
            filled_quantity: Some(quantity),
            filled_price: Some(price),
            reason: None,
        }
    }
}

/// 시그널 실행 엔진.
pub struct SignalEngine {
    gateway: Arc<dyn FuturesGateway>,
    trades: Arc<dyn TradeStore>,
    bots: Arc<dyn BotStore>,
    guard: Arc<SignalGuard>,
    flip_pause: Duration,
}

impl SignalEngine {
    /// 기본 설정으로 생성.
    pub fn new(
        gateway: Arc<dyn FuturesGateway>,
        trades: Arc<dyn TradeStore>,
        bots: Arc<dyn BotStore>,
    ) -> Self {
        Self {
            gateway,
            trades,
            bots,
            guard: Arc::new(SignalGuard::new()),
            flip_pause: DEFAULT_FLIP_PAUSE,
        }
    }

    /// 쿨다운 설정 (빌더 패턴).
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.guard = Arc::new(SignalGuard::with_cooldown(cooldown));
        self
    }

    /// 플립 레그 간 대기 설정 (빌더 패턴).
    pub fn with_flip_pause(mut self, pause: Duration) -> Self {
        self.flip_pause = pause;
        self
    }

    /// 동시성 가드 공유 (리컨실러가 같은 가드를 존중하도록).
    pub fn guard(&self) -> Arc<SignalGuard> {
        Arc::clone(&self.guard)
    }

    /// 봇의 손익 조회 (현재 마크가격 반영).
    pub async fn compute_profit(&self, bot_id: BotId) -> Result<ProfitReport, EngineError> {
        let bot = self
            .bots
            .get(bot_id)
            .await?
            .ok_or(EngineError::BotNotFound(bot_id))?;

        let trades = self.trades.list_by_bot(bot_id).await?;
        let mark = match to_futures_symbol(&bot.pair) {
            Some(symbol) => self.gateway.mark_price(&symbol).await.ok(),
            None => None,
        };
        Ok(compute_profit(bot.start_balance, &trades, mark))
    }

    /// 웹훅 시그널 처리.
    ///
    /// 인증/존재 검사는 admission보다 먼저 수행됩니다 - 위조 요청이
    /// 봇의 쿨다운을 소모하면 안 됩니다.
    pub async fn process_signal(
        &self,
        bot_id: BotId,
        signal: &WebhookSignal,
    ) -> Result<SignalOutcome, EngineError> {
        let mut bot = self
            .bots
            .get(bot_id)
            .await?
            .ok_or(EngineError::BotNotFound(bot_id))?;

        if signal.token.as_deref() != Some(bot.token.as_str()) {
            return Err(EngineError::InvalidToken);
        }

        if bot.status != BotStatus::Active {
            return Ok(SignalOutcome::rejected(RejectReason::BotPaused));
        }

        // 봇당 동시 1건. permit은 이 함수가 끝날 때 drop되어 쿨다운 시작.
        let _permit = match self.guard.try_admit(bot_id).await {
            Admission::Granted(permit) => permit,
            Admission::Busy => return Ok(SignalOutcome::rejected(RejectReason::Busy)),
            Admission::Cooldown { wait } => {
                return Ok(SignalOutcome::rejected(RejectReason::CooldownActive {
                    wait_ms: wait.as_millis() as u64,
                }))
            }
        };

        info!(
            bot_id,
            action = %signal.action,
            pair = %bot.pair,
            exchange = self.gateway.exchange_name(),
            "시그널 수신"
        );

        // admission 이후의 시도는 결과와 무관하게 마지막 시그널로 기록
        bot.last_signal = Some(signal.action.to_string());
        bot.last_signal_time = Some(signal.time.unwrap_or_else(Utc::now));

        let outcome = self.execute(&mut bot, signal).await;

        // 거부/실패 경로에서도 last_signal 갱신은 저장
        if let Err(update_err) = self.bots.update(&bot).await {
            warn!(bot_id, error = %update_err, "봇 상태 저장 실패");
        }

        outcome
    }

    /// admission 이후의 실제 실행 경로.
    async fn execute(
        &self,
        bot: &mut Bot,
        signal: &WebhookSignal,
    ) -> Result<SignalOutcome, EngineError> {
        let symbol = match to_futures_symbol(&bot.pair) {
            Some(symbol) => symbol,
            None => return Ok(SignalOutcome::rejected(RejectReason::InvalidPair(bot.pair.clone()))),
        };

        // 마진 타입/레버리지는 best-effort: 이미 설정돼 있으면 거래소가
        // 에러를 반환할 수 있으므로 실패는 기록만 하고 진행
        if let Err(e) = self
            .gateway
            .set_margin_type(&symbol, bot.leverage_type)
            .await
        {
            debug!(bot_id = bot.id, symbol = %symbol, error = %e, "마진 타입 설정 건너뜀");
        }
        if let Err(e) = self.gateway.set_leverage(&symbol, bot.leverage_value).await {
            debug!(bot_id = bot.id, symbol = %symbol, error = %e, "레버리지 설정 건너뜀");
        }

        let filters = match self.gateway.symbol_filters(&symbol).await {
            Ok(filters) => filters,
            Err(GatewayError::UnknownSymbol(s)) => {
                return Ok(SignalOutcome::rejected(RejectReason::UnknownSymbol(s)))
            }
            Err(e) => return Err(e.into()),
        };

        // 기준가: 지정가가 있으면 그 값, market이면 라이브 마크가격
        let reference_price = match signal.price {
            Some(PriceSpec::Limit(price)) if !price.is_zero() => price,
            _ => self.gateway.mark_price(&symbol).await?,
        };

        let mode = self.gateway.position_mode().await?;
        let positions = self.gateway.fetch_positions(&symbol).await?;

        let sizing = SizingInput {
            leverage: bot.leverage_value,
            basis: bot.order_sizing.basis(bot.start_balance),
            reference_price,
            filters,
        };

        let plan = match plan_signal(signal.action, mode, &positions, || entry_quantity(&sizing)) {
            Ok(plan) => plan,
            Err(reason) => {
                info!(bot_id = bot.id, %reason, "시그널 거부");
                return Ok(SignalOutcome::rejected(reason));
            }
        };

        match plan {
            OrderPlan::Open { side, quantity } => {
                self.execute_open(bot, &symbol, mode, side, quantity, reference_price, &filters)
                    .await
            }
            OrderPlan::Close { side, quantity } => {
                self.execute_close(bot, &symbol, mode, side, quantity).await
            }
            OrderPlan::Flip {
                close_side,
                close_quantity,
                open_side,
                open_quantity,
            } => {
                self.execute_flip(
                    bot,
                    &symbol,
                    close_side,
                    close_quantity,
                    open_side,
                    open_quantity,
                    reference_price,
                    &filters,
                )
                .await
            }
        }
    }

    /// 신규 진입 실행.
    #[allow(clippy::too_many_arguments)]
    async fn execute_open(
        &self,
        bot: &mut Bot,
        symbol: &str,
        mode: PositionMode,
        side: TradeSide,
        quantity: Decimal,
        reference_price: Decimal,
        filters: &SymbolFilters,
    ) -> Result<SignalOutcome, EngineError> {
        let mut request = FuturesOrderRequest::market(symbol, OrderSide::to_open(side), quantity);
        if mode == PositionMode::Hedge {
            request = request.with_position_side(side);
        }

        let response = self.gateway.place_order(&request).await?;
        let fill_price = response.avg_price.unwrap_or(reference_price);

        info!(
            bot_id = bot.id,
            %symbol,
            %side,
            %quantity,
            price = %fill_price,
            order_id = %response.order_id,
            "진입 주문 체결"
        );

        self.record_fill(
            bot,
            symbol,
            &response.order_id,
            TradeKind::Open,
            side,
            fill_price,
            quantity,
        )
        .await?;

        if bot.stop_loss_enabled && bot.stop_loss_pct > Decimal::ZERO {
            self.place_stop_loss(bot, symbol, mode, side, quantity, fill_price, filters)
                .await;
        }

        self.refresh_profit(bot, symbol).await?;
        self.verify_position(bot, symbol, Some((side, fill_price))).await;

        Ok(SignalOutcome::accepted(response.order_id, quantity, fill_price))
    }

    /// 전량 청산 실행. `side`는 청산되는 포지션의 방향.
    async fn execute_close(
        &self,
        bot: &mut Bot,
        symbol: &str,
        mode: PositionMode,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<SignalOutcome, EngineError> {
        let mut request = FuturesOrderRequest::market(symbol, OrderSide::to_close(side), quantity)
            .reduce_only(true);
        if mode == PositionMode::Hedge {
            request = request.with_position_side(side);
        }

        let response = self.gateway.place_order(&request).await?;
        let fill_price = match response.avg_price {
            Some(price) => price,
            None => self.gateway.mark_price(symbol).await?,
        };

        info!(
            bot_id = bot.id,
            %symbol,
            closed_side = %side,
            %quantity,
            price = %fill_price,
            order_id = %response.order_id,
            "청산 주문 체결"
        );

        // CLOSE 기록의 side는 청산된 포지션의 방향 - FIFO 매칭의 근거
        self.record_fill(
            bot,
            symbol,
            &response.order_id,
            TradeKind::Close,
            side,
            fill_price,
            quantity,
        )
        .await?;

        self.refresh_profit(bot, symbol).await?;
        self.verify_position(bot, symbol, None).await;

        Ok(SignalOutcome::accepted(response.order_id, quantity, fill_price))
    }

    /// 플립 실행: 청산 레그 → 원장/손익 반영 → 짧은 대기 → 진입 레그.
    #[allow(clippy::too_many_arguments)]
    async fn execute_flip(
        &self,
        bot: &mut Bot,
        symbol: &str,
        close_side: TradeSide,
        close_quantity: Decimal,
        open_side: TradeSide,
        open_quantity: Decimal,
        reference_price: Decimal,
        filters: &SymbolFilters,
    ) -> Result<SignalOutcome, EngineError> {
        // 청산 레그 제출 전에 마커 영속화 - 중간에 죽어도 복구 가능
        bot.pending_flip = Some(PendingFlip {
            target: open_side,
            quantity: open_quantity,
            reference_price,
            started_at: Utc::now(),
        });
        self.bots.update(bot).await?;

        let close_request =
            FuturesOrderRequest::market(symbol, OrderSide::to_close(close_side), close_quantity)
                .reduce_only(true);
        let close_response = self.gateway.place_order(&close_request).await?;
        let close_price = match close_response.avg_price {
            Some(price) => price,
            None => self.gateway.mark_price(symbol).await?,
        };

        info!(
            bot_id = bot.id,
            %symbol,
            closed_side = %close_side,
            quantity = %close_quantity,
            price = %close_price,
            "플립: 기존 포지션 청산"
        );

        self.record_fill(
            bot,
            symbol,
            &close_response.order_id,
            TradeKind::Close,
            close_side,
            close_price,
            close_quantity,
        )
        .await?;
        self.refresh_profit(bot, symbol).await?;
        self.bots.update(bot).await?;

        // 두 레그의 원장 기록이 같은 타임스탬프로 겹치지 않도록 최소 간격
        tokio::time::sleep(self.flip_pause).await;

        let open_request =
            FuturesOrderRequest::market(symbol, OrderSide::to_open(open_side), open_quantity);
        let open_response = self.gateway.place_order(&open_request).await?;
        let open_price = open_response.avg_price.unwrap_or(reference_price);

        info!(
            bot_id = bot.id,
            %symbol,
            %open_side,
            quantity = %open_quantity,
            price = %open_price,
            "플립: 신규 포지션 진입"
        );

        self.record_fill(
            bot,
            symbol,
            &open_response.order_id,
            TradeKind::Open,
            open_side,
            open_price,
            open_quantity,
        )
        .await?;

        if bot.stop_loss_enabled && bot.stop_loss_pct > Decimal::ZERO {
            self.place_stop_loss(
                bot,
                symbol,
                PositionMode::OneWay,
                open_side,
                open_quantity,
                open_price,
                filters,
            )
            .await;
        }

        // 진입 레그까지 완료 - 마커 제거
        bot.pending_flip = None;

        self.refresh_profit(bot, symbol).await?;
        self.verify_position(bot, symbol, Some((open_side, open_price))).await;

        Ok(SignalOutcome::accepted(
            open_response.order_id,
            open_quantity,
            open_price,
        ))
    }

    /// 체결 기록 추가 및 봇 카운터 갱신.
    #[allow(clippy::too_many_arguments)]
    async fn record_fill(
        &self,
        bot: &mut Bot,
        symbol: &str,
        order_id: &str,
        kind: TradeKind,
        side: TradeSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<(), EngineError> {
        let record = TradeRecord::new(bot.id, order_id, kind, side, price, quantity, symbol);
        let record = self.trades.append(record).await?;
        bot.trades += 1;
        debug!(bot_id = bot.id, seq = record.seq, %kind, %side, "원장 기록 추가");
        Ok(())
    }

    /// 손절 주문 제출 (best-effort).
    ///
    /// 실패해도 이미 열린 포지션은 되돌리지 않습니다.
    #[allow(clippy::too_many_arguments)]
    async fn place_stop_loss(
        &self,
        bot: &Bot,
        symbol: &str,
        mode: PositionMode,
        side: TradeSide,
        quantity: Decimal,
        fill_price: Decimal,
        filters: &SymbolFilters,
    ) {
        let pct = bot.stop_loss_pct / Decimal::from(100);
        // 롱은 진입가 아래, 숏은 진입가 위
        let raw_stop = match side {
            TradeSide::Long => fill_price * (Decimal::ONE - pct),
            TradeSide::Short => fill_price * (Decimal::ONE + pct),
        };
        let stop_price = round_down_to_step(raw_stop, filters.tick_size);

        let mut request = FuturesOrderRequest::stop_market(
            symbol,
            OrderSide::to_close(side),
            quantity,
            stop_price,
        );
        if mode == PositionMode::Hedge {
            request = request.with_position_side(side);
        }

        match self.gateway.place_order(&request).await {
            Ok(response) => {
                info!(
                    bot_id = bot.id,
                    %symbol,
                    %stop_price,
                    order_id = %response.order_id,
                    "손절 주문 등록"
                );
            }
            Err(e) => {
                warn!(
                    bot_id = bot.id,
                    %symbol,
                    %stop_price,
                    error = %e,
                    "손절 주문 실패 - 포지션은 유지됨"
                );
            }
        }
    }

    /// 원장 기준 손익 재계산 후 봇에 반영.
    async fn refresh_profit(&self, bot: &mut Bot, symbol: &str) -> Result<(), EngineError> {
        let trades = self.trades.list_by_bot(bot.id).await?;
        let mark = self.gateway.mark_price(symbol).await.ok();
        let report = compute_profit(bot.start_balance, &trades, mark);
        apply_profit(bot, &report);
        Ok(())
    }

    /// 주문 후 포지션 검증: 거래소 조회 결과를 로컬 진실로 채택.
    ///
    /// 조회 자체가 실패하면 시그널에서 유추한 값으로 폴백합니다.
    async fn verify_position(
        &self,
        bot: &mut Bot,
        symbol: &str,
        fallback: Option<(TradeSide, Decimal)>,
    ) {
        match self.gateway.fetch_positions(symbol).await {
            Ok(positions) => match positions.iter().find(|p| p.is_open()) {
                Some(position) => {
                    // 보유 포지션은 side()가 항상 Some
                    if let Some(side) = position.side() {
                        bot.adopt_position(side, position.entry_price);
                    }
                }
                None => bot.clear_position(),
            },
            Err(e) => {
                warn!(bot_id = bot.id, %symbol, error = %e, "포지션 검증 실패 - 유추값 사용");
                match fallback {
                    Some((side, entry_price)) => bot.adopt_position(side, entry_price),
                    None => bot.clear_position(),
                }
            }
        }
    }
}

/// 손익 계산 결과를 봇 집계 필드에 반영.
///
/// 포지션 필드(`position`, `entry_price`, `open_positions`)는 건드리지
/// 않습니다 - 그쪽의 진실은 거래소 검증이 결정합니다.
pub fn apply_profit(bot: &mut Bot, report: &ProfitReport) {
    bot.profit_pct = report.percentage;
    bot.current_balance = bot.start_balance + report.total_pnl;
    if report.unmatched_closes > 0 {
        warn!(
            bot_id = bot.id,
            unmatched = report.unmatched_closes,
            "원장 정합성 이상: 매칭되지 않은 CLOSE 기록"
        );
    }
}
