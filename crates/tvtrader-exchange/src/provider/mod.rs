//! 거래소 Provider 모듈.

pub mod mock;

pub use mock::MockFuturesGateway;
