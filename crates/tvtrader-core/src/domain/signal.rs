//! 웹훅 시그널.
//!
//! 외부 차트/얼럿 서비스(TradingView 등)가 전송하는 방향 지시입니다.
//! 전략 판단은 이미 끝난 상태로 도착하며, 엔진은 이를 주문 계획으로
//! 변환할 뿐 시그널 자체를 영속화하지 않습니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use super::TradeSide;

/// 시그널 액션.
///
/// 얼럿 템플릿마다 표기가 달라 `BUY`/`LONG`, `SELL`/`SHORT` 별칭을
/// 대소문자 구분 없이 허용합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// 롱 진입 (BUY / LONG)
    Long,
    /// 숏 진입 (SELL / SHORT)
    Short,
    /// 현재 포지션 청산
    Close,
}

impl SignalAction {
    /// 진입 액션이면 목표 방향, CLOSE이면 None.
    pub fn target_side(self) -> Option<TradeSide> {
        match self {
            SignalAction::Long => Some(TradeSide::Long),
            SignalAction::Short => Some(TradeSide::Short),
            SignalAction::Close => None,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Long => write!(f, "LONG"),
            SignalAction::Short => write!(f, "SHORT"),
            SignalAction::Close => write!(f, "CLOSE"),
        }
    }
}

impl std::str::FromStr for SignalAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "LONG" => Ok(SignalAction::Long),
            "SELL" | "SHORT" => Ok(SignalAction::Short),
            "CLOSE" => Ok(SignalAction::Close),
            other => Err(format!("Invalid signal action: {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for SignalAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 가격 지정.
///
/// 숫자, 숫자 문자열, 또는 `"market"`(시장가, 마크가격 사용)을 허용합니다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceSpec {
    /// 시장가 - 거래소 마크가격을 기준가로 사용
    Market,
    /// 호출자 지정 가격
    Limit(Decimal),
}

impl<'de> Deserialize<'de> for PriceSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(Decimal),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(PriceSpec::Limit(n)),
            Raw::Text(s) => {
                if s.eq_ignore_ascii_case("market") {
                    Ok(PriceSpec::Market)
                } else {
                    s.trim()
                        .parse::<Decimal>()
                        .map(PriceSpec::Limit)
                        .map_err(|e| serde::de::Error::custom(format!("invalid price: {}", e)))
                }
            }
        }
    }
}

/// 웹훅 시그널 페이로드.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSignal {
    /// 액션 (long/short/close)
    pub action: SignalAction,
    /// 거래 페어 (얼럿 표기 그대로, 예: "BINANCE:BTCUSDT.P")
    pub pair: String,
    /// 기준가 (생략 또는 "market"이면 마크가격)
    #[serde(default)]
    pub price: Option<PriceSpec>,
    /// 얼럿 발생 시각
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// 봇 토큰 (쿼리스트링 대신 본문으로 전달 가능)
    #[serde(default)]
    pub token: Option<String>,
}
