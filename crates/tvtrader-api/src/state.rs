//! API 공유 상태.

use std::sync::Arc;

use tvtrader_execution::SignalEngine;

/// 핸들러 간 공유 상태.
#[derive(Clone)]
pub struct AppState {
    /// 시그널 실행 엔진
    pub engine: Arc<SignalEngine>,
}

impl AppState {
    /// 엔진으로 상태 생성.
    pub fn new(engine: Arc<SignalEngine>) -> Self {
        Self { engine }
    }
}
