//! 심볼 정규화 / 정밀도 반올림 유틸리티.
//!
//! 얼럿 서비스가 보내는 페어 표기("BINANCE:BTCUSDT.P", "ZEC/USDT",
//! "SOL.Shift" 등)를 선물 심볼로 정규화하고, 거래소 정밀도 규칙에 맞춰
//! 수량/가격을 내림 처리합니다.

use rust_decimal::Decimal;

/// 페어 표기를 선물 심볼로 정규화.
///
/// - `BINANCE:` 접두사와 `.P`(무기한) 접미사 제거
/// - `/` 뒤의 quote 표기 제거 ("ZEC/USDT" → "ZEC")
/// - `.` 뒤의 변형 표기 제거 ("SOL.Shift" → "SOL")
/// - 영숫자 외 문자 제거, 대문자 변환
/// - `USDT` 접미사가 없으면 부착
pub fn to_futures_symbol(pair: &str) -> Option<String> {
    let trimmed = pair.trim();
    if trimmed.is_empty() {
        return None;
    }

    let stripped = trimmed
        .to_uppercase()
        .trim_start_matches("BINANCE:")
        .trim_end_matches(".P")
        .to_string();

    let base = stripped.split('/').next().unwrap_or(&stripped);
    let base = base.split('.').next().unwrap_or(base);

    let cleaned: String = base.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.is_empty() {
        return None;
    }

    if cleaned.ends_with("USDT") {
        Some(cleaned)
    } else {
        Some(format!("{}USDT", cleaned))
    }
}

/// 값을 step의 배수로 내림.
///
/// step이 0 이하이면 값을 그대로 반환합니다.
pub fn round_down_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_symbol_from_tradingview_notation() {
        assert_eq!(
            to_futures_symbol("BINANCE:BTCUSDT.P"),
            Some("BTCUSDT".to_string())
        );
        assert_eq!(to_futures_symbol("btcusdt"), Some("BTCUSDT".to_string()));
    }

    #[test]
    fn test_symbol_from_pair_notation() {
        assert_eq!(to_futures_symbol("ZEC/USDT"), Some("ZECUSDT".to_string()));
        assert_eq!(to_futures_symbol("SOL.Shift"), Some("SOLUSDT".to_string()));
        assert_eq!(to_futures_symbol("ETHUSDT"), Some("ETHUSDT".to_string()));
    }

    #[test]
    fn test_symbol_rejects_empty() {
        assert_eq!(to_futures_symbol(""), None);
        assert_eq!(to_futures_symbol("  "), None);
        assert_eq!(to_futures_symbol("///"), None);
    }

    #[test]
    fn test_round_down_to_step() {
        assert_eq!(round_down_to_step(dec!(0.0025), dec!(0.001)), dec!(0.002));
        assert_eq!(round_down_to_step(dec!(1.999), dec!(0.5)), dec!(1.5));
        assert_eq!(round_down_to_step(dec!(0.0009), dec!(0.001)), dec!(0));
        // step 0이면 원본 유지
        assert_eq!(round_down_to_step(dec!(1.23), dec!(0)), dec!(1.23));
    }

    #[test]
    fn test_round_down_exact_multiple() {
        assert_eq!(round_down_to_step(dec!(0.002), dec!(0.001)), dec!(0.002));
    }
}
