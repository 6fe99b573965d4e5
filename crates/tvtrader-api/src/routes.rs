//! HTTP 라우트.
//!
//! - `POST /api/webhook/{bot_id}` : 웹훅 시그널 수신
//! - `GET  /api/bots/{bot_id}/profit` : 봇 손익 조회
//! - `GET  /api/health` : 헬스 체크

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use tvtrader_core::{BotId, WebhookSignal};
use tvtrader_execution::{EngineError, SignalOutcome};
use tvtrader_ledger::ProfitReport;

use crate::state::AppState;

/// 라우터 생성.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/webhook/{bot_id}", post(handle_webhook))
        .route("/api/bots/{bot_id}/profit", get(bot_profit))
        .with_state(state)
}

// ============================================================================
// Request/Response 타입
// ============================================================================

/// 웹훅 쿼리 파라미터.
///
/// 일부 얼럿 템플릿은 토큰을 본문 대신 쿼리로 보냅니다.
#[derive(Debug, Deserialize)]
struct WebhookQuery {
    #[serde(default)]
    token: Option<String>,
}

/// 웹훅 처리 결과 응답.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<SignalOutcome> for WebhookResponse {
    fn from(outcome: SignalOutcome) -> Self {
        Self {
            success: outcome.accepted,
            order_id: outcome.order_id,
            qty: outcome.filled_quantity,
            price: outcome.filled_price,
            message: outcome.reason,
        }
    }
}

/// 봇 손익 응답.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfitResponse {
    bot_id: BotId,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    total_pnl: Decimal,
    percentage: Decimal,
    open_lots: usize,
    unmatched_closes: usize,
}

impl ProfitResponse {
    fn new(bot_id: BotId, report: ProfitReport) -> Self {
        Self {
            bot_id,
            realized_pnl: report.realized_pnl,
            unrealized_pnl: report.unrealized_pnl,
            total_pnl: report.total_pnl,
            percentage: report.percentage,
            open_lots: report.open_lots,
            unmatched_closes: report.unmatched_closes,
        }
    }
}

/// 에러 응답 본문.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

// ============================================================================
// 핸들러
// ============================================================================

/// 헬스 체크.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// 웹훅 시그널 처리.
///
/// 본문에 토큰이 없으면 쿼리 파라미터의 토큰을 사용합니다.
/// 거부(쿨다운, 수량 미달 등)는 200 + `success: false`로,
/// 인증 실패와 미등록 봇은 각각 401/404로 응답합니다.
async fn handle_webhook(
    State(state): State<AppState>,
    Path(bot_id): Path<BotId>,
    Query(query): Query<WebhookQuery>,
    Json(mut signal): Json<WebhookSignal>,
) -> Response {
    if signal.token.is_none() {
        signal.token = query.token;
    }

    info!(bot_id = bot_id, action = %signal.action, pair = %signal.pair, "웹훅 수신");

    match state.engine.process_signal(bot_id, &signal).await {
        Ok(outcome) => (StatusCode::OK, Json(WebhookResponse::from(outcome))).into_response(),
        Err(err) => engine_error_response(err),
    }
}

/// 봇 손익 조회.
async fn bot_profit(State(state): State<AppState>, Path(bot_id): Path<BotId>) -> Response {
    match state.engine.compute_profit(bot_id).await {
        Ok(report) => (StatusCode::OK, Json(ProfitResponse::new(bot_id, report))).into_response(),
        Err(err) => engine_error_response(err),
    }
}

/// 엔진 에러를 HTTP 상태코드로 변환.
fn engine_error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::BotNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidToken => StatusCode::UNAUTHORIZED,
        EngineError::Gateway(_) | EngineError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = ErrorResponse {
        success: false,
        message: err.to_string(),
    };
    (status, Json(body)).into_response()
}

// ============================================================================
// 테스트
// ============================================================================
