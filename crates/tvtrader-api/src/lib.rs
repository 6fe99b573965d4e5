//! 웹훅 API 서버.
//!
//! 외부 얼럿 서비스의 웹훅을 받아 시그널 엔진에 전달하고, 봇 손익 조회와
//! 헬스 체크 엔드포인트를 제공합니다. 라우팅/직렬화만 담당하며 판단은
//! 전부 `tvtrader-execution`에 위임합니다.

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
