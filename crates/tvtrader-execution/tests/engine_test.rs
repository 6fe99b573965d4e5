//! 시그널 실행 엔진 통합 테스트
//!
//! Mock 거래소와 메모리 저장소로 시그널 수신부터 원장 기록,
//! 손익 반영, 리컨실레이션까지의 전체 경로를 검증합니다.
//!
//! ## 테스트 검증 항목
//! 1. 진입/청산 경로: 주문 제출, 원장 기록, 포지션 캐시 갱신
//! 2. 거부 경로: 포지션 없음/중복 방향/수량 미달 시 주문 미제출
//! 3. 플립: 청산 CLOSE(기존 방향) → 진입 OPEN(새 방향) 순서 보장
//! 4. 손익 시나리오: 롱 +4.00, 숏 +2.00, 누적 +4.00
//! 5. 동시성: 같은 봇의 동시 시그널은 1건만 허가, 이후 쿨다운
//! 6. 리컨실레이션: 외부 청산 감지 시 합성 CLOSE + 포지션 초기화

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tvtrader_core::{
    Bot, BotStatus, FuturesGateway, FuturesOrderType, LeverageType, OrderSizing, PendingFlip,
    PositionState, PriceSpec, SignalAction, SymbolFilters, TradeKind, TradeSide, WebhookSignal,
};
use tvtrader_exchange::MockFuturesGateway;
use tvtrader_execution::{EngineError, Reconciler, SignalEngine};
use tvtrader_ledger::{BotStore, MemoryBotStore, MemoryTradeStore, TradeStore};

// ============================================================================
// 테스트 헬퍼
// ============================================================================

struct Harness {
    engine: SignalEngine,
    gateway: Arc<MockFuturesGateway>,
    trades: Arc<MemoryTradeStore>,
    bots: Arc<MemoryBotStore>,
}

async fn harness() -> Harness {
    let gateway = Arc::new(MockFuturesGateway::new());
    gateway.set_mark_price("BTCUSDT", dec!(50000)).await;

    let trades = Arc::new(MemoryTradeStore::new());
    let bots = Arc::new(MemoryBotStore::new());

    let engine = SignalEngine::new(gateway.clone(), trades.clone(), bots.clone())
        .with_cooldown(Duration::from_millis(100))
        .with_flip_pause(Duration::from_millis(1));

    Harness {
        engine,
        gateway,
        trades,
        bots,
    }
}

fn sample_bot(id: i64) -> Bot {
    Bot {
        id,
        name: format!("bot-{}", id),
        pair: "BINANCE:BTCUSDT.P".to_string(),
        exchange: "MockFutures".to_string(),
        token: "secret".to_string(),
        status: BotStatus::Active,
        leverage_type: LeverageType::Cross,
        leverage_value: 1,
        order_sizing: OrderSizing::Quote(dec!(100)),
        start_balance: dec!(100),
        stop_loss_pct: Decimal::ZERO,
        stop_loss_enabled: false,
        position: PositionState::None,
        entry_price: Decimal::ZERO,
        open_positions: 0,
        trades: 0,
        profit_pct: Decimal::ZERO,
        current_balance: dec!(100),
        last_signal: None,
        last_signal_time: None,
        pending_flip: None,
        created_at: Utc::now(),
    }
}

fn signal(action: SignalAction) -> WebhookSignal {
    WebhookSignal {
        action,
        pair: "BINANCE:BTCUSDT.P".to_string(),
        price: None,
        time: None,
        token: Some("secret".to_string()),
    }
}

/// 쿨다운이 풀릴 때까지 대기.
async fn wait_cooldown() {
    tokio::time::sleep(Duration::from_millis(120)).await;
}

// ============================================================================
// 진입 / 청산 기본 경로
// ============================================================================

#[tokio::test]
async fn test_long_signal_opens_position() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    let outcome = h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();

    assert!(outcome.accepted, "{:?}", outcome.reason);
    // 1 × 100 / 50000 = 0.002
    assert_eq!(outcome.filled_quantity, Some(dec!(0.002)));
    assert_eq!(outcome.filled_price, Some(dec!(50000)));

    let records = h.trades.list_by_bot(1).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, TradeKind::Open);
    assert_eq!(records[0].side, TradeSide::Long);

    let bot = h.bots.get(1).await.unwrap().unwrap();
    assert_eq!(bot.position, PositionState::Long);
    assert_eq!(bot.entry_price, dec!(50000));
    assert_eq!(bot.trades, 1);
    assert!(bot.position_fields_consistent());
    assert_eq!(bot.last_signal.as_deref(), Some("LONG"));

    // 진입 전에 마진 타입/레버리지가 거래소에 반영됨
    assert_eq!(h.gateway.leverage_of("BTCUSDT").await, Some(1));
    assert_eq!(
        h.gateway.margin_type_of("BTCUSDT").await,
        Some(LeverageType::Cross)
    );
}

#[tokio::test]
async fn test_close_signal_records_closed_side() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    wait_cooldown().await;

    h.gateway.set_mark_price("BTCUSDT", dec!(52000)).await;
    let outcome = h.engine.process_signal(1, &signal(SignalAction::Close)).await.unwrap();
    assert!(outcome.accepted, "{:?}", outcome.reason);

    let records = h.trades.list_by_bot(1).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].kind, TradeKind::Close);
    // CLOSE 기록의 side는 청산된 포지션의 방향
    assert_eq!(records[1].side, TradeSide::Long);
    assert_eq!(records[1].price, dec!(52000));

    let bot = h.bots.get(1).await.unwrap().unwrap();
    assert_eq!(bot.position, PositionState::None);
    assert!(bot.position_fields_consistent());
}

// ============================================================================
// 거부 경로 (주문 미제출, 원장 미기록)
// ============================================================================

#[tokio::test]
async fn test_close_without_position_rejected() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    let outcome = h.engine.process_signal(1, &signal(SignalAction::Close)).await.unwrap();

    assert!(!outcome.accepted);
    assert!(outcome.reason.is_some());
    assert!(h.gateway.submitted_orders().await.is_empty());
    assert!(h.trades.list_by_bot(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_direction_rejected() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    wait_cooldown().await;

    let outcome = h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    assert!(!outcome.accepted);

    // 진입 주문 1건 그대로
    assert_eq!(h.gateway.submitted_orders().await.len(), 1);
    assert_eq!(h.trades.list_by_bot(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_quantity_below_minimum_rejected() {
    let h = harness().await;
    h.gateway
        .set_symbol_filters(
            "BTCUSDT",
            SymbolFilters {
                step_size: dec!(1),
                min_notional: dec!(1000000),
                tick_size: dec!(0.01),
            },
        )
        .await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    let outcome = h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    assert!(!outcome.accepted);
    assert!(h.gateway.submitted_orders().await.is_empty());
}

#[tokio::test]
async fn test_unknown_symbol_rejected() {
    let h = harness().await;
    let mut bot = sample_bot(1);
    bot.pair = "NOPEUSDT".to_string();
    h.bots.insert(&bot).await.unwrap();

    let outcome = h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    assert!(!outcome.accepted);
    assert!(h.gateway.submitted_orders().await.is_empty());
}

#[tokio::test]
async fn test_paused_bot_rejected() {
    let h = harness().await;
    let mut bot = sample_bot(1);
    bot.status = BotStatus::Paused;
    h.bots.insert(&bot).await.unwrap();

    let outcome = h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    assert!(!outcome.accepted);
}

#[tokio::test]
async fn test_invalid_token_is_error_not_rejection() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    let mut bad = signal(SignalAction::Long);
    bad.token = Some("wrong".to_string());
    let result = h.engine.process_signal(1, &bad).await;
    assert!(matches!(result, Err(EngineError::InvalidToken)));

    let missing = h.engine.process_signal(99, &signal(SignalAction::Long)).await;
    assert!(matches!(missing, Err(EngineError::BotNotFound(99))));
}

// ============================================================================
// 손익 시나리오
// ============================================================================

#[tokio::test]
async fn test_long_round_trip_profit() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    // OPEN LONG 0.002 @ 50000 → CLOSE @ 52000 → +4.00 (+4%)
    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    wait_cooldown().await;
    h.gateway.set_mark_price("BTCUSDT", dec!(52000)).await;
    h.engine.process_signal(1, &signal(SignalAction::Close)).await.unwrap();

    let report = h.engine.compute_profit(1).await.unwrap();
    assert_eq!(report.realized_pnl, dec!(4.00));
    assert_eq!(report.open_lots, 0);

    let bot = h.bots.get(1).await.unwrap().unwrap();
    assert_eq!(bot.profit_pct, dec!(4));
    assert_eq!(bot.current_balance, dec!(104.00));
}

#[tokio::test]
async fn test_cumulative_profit_across_round_trips() {
    let h = harness().await;
    let mut bot = sample_bot(1);
    // 수량이 마크가격에 따라 변하지 않도록 사이징 조정 없이 시나리오 가격만 사용
    bot.order_sizing = OrderSizing::Quote(dec!(104));
    h.bots.insert(&bot).await.unwrap();

    // A: LONG 0.002 @ 52000 → CLOSE @ 54000 = +4.00
    h.gateway.set_mark_price("BTCUSDT", dec!(52000)).await;
    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    wait_cooldown().await;
    h.gateway.set_mark_price("BTCUSDT", dec!(54000)).await;
    h.engine.process_signal(1, &signal(SignalAction::Close)).await.unwrap();
    wait_cooldown().await;

    // B: SHORT 0.002 @ 52000 → CLOSE @ 51000 = +2.00
    h.gateway.set_mark_price("BTCUSDT", dec!(52000)).await;
    h.engine.process_signal(1, &signal(SignalAction::Short)).await.unwrap();
    wait_cooldown().await;
    h.gateway.set_mark_price("BTCUSDT", dec!(51000)).await;
    h.engine.process_signal(1, &signal(SignalAction::Close)).await.unwrap();
    wait_cooldown().await;

    // C: LONG 0.002 @ 52000 → CLOSE @ 51000 = -2.00
    h.gateway.set_mark_price("BTCUSDT", dec!(52000)).await;
    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    wait_cooldown().await;
    h.gateway.set_mark_price("BTCUSDT", dec!(51000)).await;
    h.engine.process_signal(1, &signal(SignalAction::Close)).await.unwrap();

    let report = h.engine.compute_profit(1).await.unwrap();
    assert_eq!(report.realized_pnl, dec!(4.00));
    assert_eq!(report.open_lots, 0);
}

// ============================================================================
// 플립 (원웨이 반대 방향 전환)
// ============================================================================

#[tokio::test]
async fn test_flip_records_close_then_open() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    wait_cooldown().await;

    let outcome = h.engine.process_signal(1, &signal(SignalAction::Short)).await.unwrap();
    assert!(outcome.accepted, "{:?}", outcome.reason);

    let records = h.trades.list_by_bot(1).await.unwrap();
    assert_eq!(records.len(), 3);
    // 진입 OPEN(LONG) → 플립 CLOSE(LONG) → 플립 OPEN(SHORT), seq 순서 보장
    assert_eq!(records[1].kind, TradeKind::Close);
    assert_eq!(records[1].side, TradeSide::Long);
    assert_eq!(records[2].kind, TradeKind::Open);
    assert_eq!(records[2].side, TradeSide::Short);
    assert!(records[1].seq < records[2].seq);

    let bot = h.bots.get(1).await.unwrap().unwrap();
    assert_eq!(bot.position, PositionState::Short);
    assert!(bot.pending_flip.is_none());
    assert!(bot.position_fields_consistent());
}

// ============================================================================
// 손절 주문
// ============================================================================

#[tokio::test]
async fn test_stop_loss_placed_below_long_entry() {
    let h = harness().await;
    let mut bot = sample_bot(1);
    bot.stop_loss_enabled = true;
    bot.stop_loss_pct = dec!(2);
    h.bots.insert(&bot).await.unwrap();

    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();

    let orders = h.gateway.submitted_orders().await;
    assert_eq!(orders.len(), 2);
    let stop = &orders[1];
    assert_eq!(stop.order_type, FuturesOrderType::StopMarket);
    assert!(stop.reduce_only);
    // 50000 × (1 - 0.02) = 49000
    assert_eq!(stop.stop_price, Some(dec!(49000)));
}

#[tokio::test]
async fn test_stop_loss_failure_keeps_position() {
    let h = harness().await;
    let mut bot = sample_bot(1);
    bot.stop_loss_enabled = true;
    bot.stop_loss_pct = dec!(2);
    h.bots.insert(&bot).await.unwrap();

    // 손절 주문만 실패 - 진입은 정상 체결
    h.gateway.fail_next_stop_orders(true);
    let outcome = h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    assert!(outcome.accepted, "{:?}", outcome.reason);

    let saved = h.bots.get(1).await.unwrap().unwrap();
    assert_eq!(saved.position, PositionState::Long);
    assert_eq!(h.trades.list_by_bot(1).await.unwrap().len(), 1);
}

// ============================================================================
// 동시성 / 쿨다운
// ============================================================================

#[tokio::test]
async fn test_concurrent_signals_admit_exactly_one() {
    let h = Arc::new(harness().await);
    h.bots.insert(&sample_bot(1)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.engine
                .process_signal(1, &signal(SignalAction::Long))
                .await
                .unwrap()
                .accepted
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    // 처리 중이면 Busy, 완료 후면 쿨다운 - 어느 쪽이든 1건만 허가
    assert_eq!(accepted, 1);
    assert_eq!(h.trades.list_by_bot(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cooldown_rejects_immediate_retry() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    let first = h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    assert!(first.accepted);

    let second = h.engine.process_signal(1, &signal(SignalAction::Close)).await.unwrap();
    assert!(!second.accepted);
    assert!(second.reason.unwrap().contains("쿨다운"));

    wait_cooldown().await;
    let third = h.engine.process_signal(1, &signal(SignalAction::Close)).await.unwrap();
    assert!(third.accepted);
}

// ============================================================================
// 리컨실레이션
// ============================================================================

fn reconciler(h: &Harness) -> Reconciler {
    Reconciler::new(
        h.gateway.clone(),
        h.trades.clone(),
        h.bots.clone(),
        h.engine.guard(),
    )
    .with_inter_bot_delay(Duration::from_millis(1))
}

#[tokio::test]
async fn test_reconcile_synthesizes_close_for_external_close() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    // 진입 후 거래소에서 수동 청산된 상황 재현
    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    h.gateway.clear_positions().await;
    h.gateway.set_mark_price("BTCUSDT", dec!(51000)).await;
    wait_cooldown().await;

    let corrected = reconciler(&h).reconcile_once().await;
    assert_eq!(corrected, 1);

    let records = h.trades.list_by_bot(1).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].kind, TradeKind::Close);
    assert_eq!(records[1].side, TradeSide::Long);
    assert_eq!(records[1].price, dec!(51000));

    let bot = h.bots.get(1).await.unwrap().unwrap();
    assert_eq!(bot.position, PositionState::None);
    assert!(bot.position_fields_consistent());
    // (51000 - 50000) × 0.002 = +2.00
    assert_eq!(bot.profit_pct, dec!(2));
}

#[tokio::test]
async fn test_reconcile_adopts_untracked_position() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    // 거래소에만 존재하는 포지션 (수동 진입 등)
    h.gateway.set_position("BTCUSDT", dec!(0.003), dec!(49000)).await;

    let corrected = reconciler(&h).reconcile_once().await;
    assert_eq!(corrected, 1);

    let bot = h.bots.get(1).await.unwrap().unwrap();
    assert_eq!(bot.position, PositionState::Long);
    assert_eq!(bot.entry_price, dec!(49000));
}

#[tokio::test]
async fn test_reconcile_resumes_interrupted_flip() {
    let h = harness().await;
    let mut bot = sample_bot(1);
    // 청산 레그까지 끝나고 진입 레그 전에 중단된 플립
    bot.pending_flip = Some(PendingFlip {
        target: TradeSide::Short,
        quantity: dec!(0.002),
        reference_price: dec!(50000),
        started_at: Utc::now(),
    });
    h.bots.insert(&bot).await.unwrap();

    let corrected = reconciler(&h).reconcile_once().await;
    assert_eq!(corrected, 1);

    let records = h.trades.list_by_bot(1).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, TradeKind::Open);
    assert_eq!(records[0].side, TradeSide::Short);

    let bot = h.bots.get(1).await.unwrap().unwrap();
    assert!(bot.pending_flip.is_none());
    assert_eq!(bot.position, PositionState::Short);
}

#[tokio::test]
async fn test_reconcile_resumes_flip_interrupted_before_close_leg() {
    let h = harness().await;
    h.bots.insert(&sample_bot(1)).await.unwrap();

    // 롱 진입 직후, 청산 레그 제출 전에 중단된 플립 상황 재현:
    // 거래소에는 롱이 그대로 남아 있고 마커만 영속화된 상태
    h.engine.process_signal(1, &signal(SignalAction::Long)).await.unwrap();
    let mut bot = h.bots.get(1).await.unwrap().unwrap();
    bot.pending_flip = Some(PendingFlip {
        target: TradeSide::Short,
        quantity: dec!(0.002),
        reference_price: dec!(50000),
        started_at: Utc::now(),
    });
    h.bots.update(&bot).await.unwrap();

    let corrected = reconciler(&h).reconcile_once().await;
    assert_eq!(corrected, 1);

    // 청산 레그 → 진입 레그 순서로 원장 완결
    let records = h.trades.list_by_bot(1).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].kind, TradeKind::Close);
    assert_eq!(records[1].side, TradeSide::Long);
    assert_eq!(records[2].kind, TradeKind::Open);
    assert_eq!(records[2].side, TradeSide::Short);

    // 거래소에도 실제 숏 포지션이 존재
    let positions = h.gateway.fetch_positions("BTCUSDT").await.unwrap();
    let open: Vec<_> = positions.iter().filter(|p| p.is_open()).collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].side(), Some(TradeSide::Short));
    assert_eq!(open[0].quantity(), dec!(0.002));

    let bot = h.bots.get(1).await.unwrap().unwrap();
    assert!(bot.pending_flip.is_none());
    assert_eq!(bot.position, PositionState::Short);
    assert!(bot.position_fields_consistent());
}

#[tokio::test]
async fn test_reconcile_skips_bot_with_signal_in_flight() {
    let h = harness().await;
    let mut bot = sample_bot(1);
    bot.position = PositionState::Long;
    bot.entry_price = dec!(50000);
    bot.open_positions = 1;
    h.bots.insert(&bot).await.unwrap();

    // 시그널 처리 중인 것처럼 가드 점유
    let guard = h.engine.guard();
    let _permit = match guard.try_admit(1).await {
        tvtrader_execution::Admission::Granted(p) => p,
        other => panic!("admission 실패: {:?}", other),
    };

    let corrected = reconciler(&h).reconcile_once().await;
    assert_eq!(corrected, 0);

    // 건드리지 않음
    let saved = h.bots.get(1).await.unwrap().unwrap();
    assert_eq!(saved.position, PositionState::Long);
}

#[tokio::test]
async fn test_reconcile_continues_past_unprocessable_bot() {
    let h = harness().await;
    let mut first = sample_bot(1);
    first.pair = "///".to_string(); // 변환 불가 페어
    h.bots.insert(&first).await.unwrap();

    let mut second = sample_bot(2);
    second.pair = "ETHUSDT".to_string();
    h.bots.insert(&second).await.unwrap();

    // 봇 2에만 거래소 포지션 존재 (미추적 포지션 채택 대상)
    h.gateway.set_mark_price("ETHUSDT", dec!(3000)).await;
    h.gateway.set_position("ETHUSDT", dec!(0.1), dec!(2900)).await;

    let corrected = reconciler(&h).reconcile_once().await;

    // 봇 1은 건너뛰고 봇 2는 교정됨
    assert_eq!(corrected, 1);
    let bot2 = h.bots.get(2).await.unwrap().unwrap();
    assert_eq!(bot2.position, PositionState::Long);
    assert_eq!(bot2.entry_price, dec!(2900));
}
