//! 웹훅 API 서버 엔트리포인트.
//!
//! Axum 기반 서버를 시작하고 30초 주기 리컨실레이션 루프를 함께 띄웁니다.
//! `DATABASE_URL`이 설정되면 PostgreSQL 저장소를, 없으면 메모리 저장소를
//! 사용합니다 (개발/테스트 전용).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use tvtrader_api::{create_router, AppState};
use tvtrader_core::FuturesGateway;
use tvtrader_exchange::MockFuturesGateway;
use tvtrader_execution::{Reconciler, SignalEngine, DEFAULT_RECONCILE_INTERVAL};
use tvtrader_ledger::{
    BotStore, MemoryBotStore, MemoryTradeStore, PgBotStore, PgTradeStore, TradeStore,
};

/// 서버 설정 구조체.
struct ServerConfig {
    /// 바인딩할 호스트 주소
    host: String,
    /// 바인딩할 포트
    port: u16,
    /// 리컨실레이션 주기
    reconcile_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// 환경 변수에서 설정 로드.
    fn from_env() -> Self {
        let host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("API_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let reconcile_interval = std::env::var("RECONCILE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL);

        Self {
            host,
            port,
            reconcile_interval,
        }
    }

    /// 소켓 주소 반환.
    ///
    /// # Errors
    /// `host:port` 형식이 유효하지 않으면 `AddrParseError`를 반환합니다.
    fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// 저장소 초기화.
///
/// `DATABASE_URL`이 있으면 PostgreSQL, 없으면 메모리 저장소를 사용합니다.
async fn create_stores() -> anyhow::Result<(Arc<dyn TradeStore>, Arc<dyn BotStore>)> {
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&database_url)
            .await?;

        // 연결 테스트
        sqlx::query("SELECT 1").fetch_one(&pool).await?;
        info!("PostgreSQL 저장소 연결 완료");

        Ok((
            Arc::new(PgTradeStore::new(pool.clone())),
            Arc::new(PgBotStore::new(pool)),
        ))
    } else {
        warn!("DATABASE_URL not set, using in-memory stores (state is lost on restart)");
        Ok((
            Arc::new(MemoryTradeStore::new()),
            Arc::new(MemoryBotStore::new()),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일 로드 (있는 경우)
    let _ = dotenvy::dotenv();

    // tracing 초기화
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tvtrader_api=info,tvtrader_execution=info,tower_http=debug".into()),
        )
        .init();

    info!("Starting tvtrader API server...");

    let config = ServerConfig::from_env();
    let addr = config.socket_addr().map_err(|e| {
        error!(
            host = %config.host,
            port = config.port,
            error = %e,
            "소켓 주소 설정이 유효하지 않습니다. API_HOST, API_PORT 환경변수를 확인하세요."
        );
        e
    })?;

    let (trades, bots) = create_stores().await?;

    // TODO: 실거래소 게이트웨이 구현 연결 (현재는 모의 게이트웨이로 기동)
    let gateway: Arc<dyn FuturesGateway> = Arc::new(MockFuturesGateway::new());
    info!(exchange = gateway.exchange_name(), "게이트웨이 초기화 완료");

    let engine = Arc::new(SignalEngine::new(
        gateway.clone(),
        trades.clone(),
        bots.clone(),
    ));

    // 리컨실레이션 루프 시작 (엔진과 같은 guard 공유로 시그널 처리와 상호 배제)
    let shutdown_token = CancellationToken::new();
    let reconciler = Reconciler::new(gateway, trades, bots, engine.guard())
        .with_interval(config.reconcile_interval);
    let reconcile_handle = tokio::spawn({
        let token = shutdown_token.clone();
        async move { reconciler.run(token).await }
    });

    let app = create_router(AppState::new(engine))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    info!(%addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await?;

    // 리컨실레이션 루프 정리 대기
    shutdown_token.cancel();
    if tokio::time::timeout(Duration::from_secs(5), reconcile_handle)
        .await
        .is_err()
    {
        warn!("리컨실레이션 루프 정리 타임아웃, 강제 종료");
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Graceful shutdown 시그널 대기.
///
/// Ctrl+C 또는 SIGTERM 시그널을 수신하면 종료 토큰을 취소합니다.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    shutdown_token.cancel();
    info!("Shutdown signal propagated to background tasks");
}
