//! 거래소 게이트웨이 구현체.
//!
//! `tvtrader-core`의 `FuturesGateway` trait 구현을 제공합니다.
//! 현재 제공 구현:
//!
//! - [`provider::MockFuturesGateway`] - 인메모리 가상 거래소.
//!   엔진/리컨실러 검증과 드라이런 운용에 사용합니다.

pub mod provider;

pub use provider::MockFuturesGateway;
