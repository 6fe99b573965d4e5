//! 시그널 실행 엔진과 포지션 리컨실레이션.
//!
//! - [`guard`] - 봇별 동시성 가드 (동시 1건 + 쿨다운)
//! - [`planner`] - 시그널 → 주문 계획 결정 (순수 함수)
//! - [`engine`] - 주문 실행 프로토콜 (제출, 원장 기록, 손절, 검증)
//! - [`reconcile`] - 주기적 로컬/거래소 상태 교정 루프

pub mod engine;
pub mod guard;
pub mod planner;
pub mod reconcile;

pub use engine::{apply_profit, EngineError, SignalEngine, SignalOutcome, DEFAULT_FLIP_PAUSE};
pub use guard::{Admission, MaintenancePermit, SignalGuard, SignalPermit, DEFAULT_COOLDOWN};
pub use planner::{entry_quantity, plan_signal, OrderPlan, RejectReason, SizingInput};
pub use reconcile::{Reconciler, DEFAULT_INTER_BOT_DELAY, DEFAULT_RECONCILE_INTERVAL};
