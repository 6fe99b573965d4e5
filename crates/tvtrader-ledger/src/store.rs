//! 원장/봇 저장소 추상화.
//!
//! 엔진은 `TradeStore`(append-only 체결 원장)와 `BotStore`(봇 레코드)만
//! 소비합니다. 스키마 관리와 범용 CRUD는 외부 협력자의 책임입니다.
//!
//! 봇 레코드 쓰기는 봇당 동시 1건 admission 보장에 의해 직렬화되므로
//! 저장소 수준의 추가 잠금이 필요 없습니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

use tvtrader_core::{
    Bot, BotId, BotStatus, LeverageType, OrderSizing, PendingFlip, PositionState, TradeKind,
    TradeRecord,
};

/// 저장소 에러.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// 봇 없음
    #[error("봇을 찾을 수 없음: {0}")]
    BotNotFound(BotId),

    /// DB 에러
    #[error("DB 에러: {0}")]
    Database(#[from] sqlx::Error),

    /// 직렬화 에러 (pending_flip / order_sizing JSON)
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 저장된 값 파싱 실패
    #[error("저장 값 파싱 실패: {0}")]
    Parse(String),
}

// =============================================================================
// Trait
// =============================================================================

/// 체결 원장 저장소.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// 체결 기록 추가. 단조 증가 `seq`를 부여하여 반환합니다.
    async fn append(&self, record: TradeRecord) -> Result<TradeRecord, LedgerError>;

    /// 봇의 체결 기록을 `seq` 오름차순으로 조회.
    async fn list_by_bot(&self, bot_id: BotId) -> Result<Vec<TradeRecord>, LedgerError>;

    /// 봇의 (OPEN 수, CLOSE 수) 집계.
    async fn count_by_kind(&self, bot_id: BotId) -> Result<(u64, u64), LedgerError> {
        let trades = self.list_by_bot(bot_id).await?;
        let opens = trades.iter().filter(|t| t.kind == TradeKind::Open).count() as u64;
        let closes = trades.iter().filter(|t| t.kind == TradeKind::Close).count() as u64;
        Ok((opens, closes))
    }
}

/// 봇 레코드 저장소.
#[async_trait]
pub trait BotStore: Send + Sync {
    /// 봇 조회.
    async fn get(&self, bot_id: BotId) -> Result<Option<Bot>, LedgerError>;

    /// 활성 봇 목록 조회 (리컨실레이션 대상).
    async fn list_active(&self) -> Result<Vec<Bot>, LedgerError>;

    /// 봇 레코드 전체 갱신.
    async fn update(&self, bot: &Bot) -> Result<(), LedgerError>;

    /// 봇 등록 (셋업/테스트용 - 코어는 봇을 생성하지 않음).
    async fn insert(&self, bot: &Bot) -> Result<(), LedgerError>;
}

// =============================================================================
// 메모리 구현
// =============================================================================

/// 메모리 체결 원장 (테스트/단일 프로세스 운용).
#[derive(Default)]
pub struct MemoryTradeStore {
    records: RwLock<Vec<TradeRecord>>,
    next_seq: AtomicI64,
}

impl MemoryTradeStore {
    /// 빈 원장 생성.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_seq: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn append(&self, mut record: TradeRecord) -> Result<TradeRecord, LedgerError> {
        record.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_by_bot(&self, bot_id: BotId) -> Result<Vec<TradeRecord>, LedgerError> {
        let records = self.records.read().await;
        let mut result: Vec<TradeRecord> = records
            .iter()
            .filter(|t| t.bot_id == bot_id)
            .cloned()
            .collect();
        result.sort_by_key(|t| t.seq);
        Ok(result)
    }
}

/// 메모리 봇 저장소.
#[derive(Default)]
pub struct MemoryBotStore {
    bots: RwLock<HashMap<BotId, Bot>>,
}

impl MemoryBotStore {
    /// 빈 저장소 생성.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BotStore for MemoryBotStore {
    async fn get(&self, bot_id: BotId) -> Result<Option<Bot>, LedgerError> {
        Ok(self.bots.read().await.get(&bot_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Bot>, LedgerError> {
        let bots = self.bots.read().await;
        let mut active: Vec<Bot> = bots
            .values()
            .filter(|b| b.status == BotStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|b| b.id);
        Ok(active)
    }

    async fn update(&self, bot: &Bot) -> Result<(), LedgerError> {
        let mut bots = self.bots.write().await;
        if !bots.contains_key(&bot.id) {
            return Err(LedgerError::BotNotFound(bot.id));
        }
        bots.insert(bot.id, bot.clone());
        Ok(())
    }

    async fn insert(&self, bot: &Bot) -> Result<(), LedgerError> {
        self.bots.write().await.insert(bot.id, bot.clone());
        Ok(())
    }
}

// =============================================================================
// PostgreSQL 구현
// =============================================================================

/// trades 테이블 행.
#[derive(sqlx::FromRow)]
struct TradeRow {
    seq: i64,
    bot_id: i64,
    order_id: String,
    kind: String,
    side: String,
    price: Decimal,
    quantity: Decimal,
    timestamp: chrono::DateTime<chrono::Utc>,
    symbol: String,
}

impl TryFrom<TradeRow> for TradeRecord {
    type Error = LedgerError;

    fn try_from(row: TradeRow) -> Result<Self, Self::Error> {
        Ok(TradeRecord {
            seq: row.seq,
            bot_id: row.bot_id,
            order_id: row.order_id,
            kind: row.kind.parse().map_err(LedgerError::Parse)?,
            side: row.side.parse().map_err(LedgerError::Parse)?,
            price: row.price,
            quantity: row.quantity,
            timestamp: row.timestamp,
            symbol: row.symbol,
        })
    }
}

/// PostgreSQL 체결 원장.
///
/// `seq`는 BIGSERIAL이 부여하므로 프로세스 재시작 후에도 단조 증가가
/// 유지됩니다.
pub struct PgTradeStore {
    pool: PgPool,
}

impl PgTradeStore {
    /// 커넥션 풀로 생성.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeStore for PgTradeStore {
    async fn append(&self, mut record: TradeRecord) -> Result<TradeRecord, LedgerError> {
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO trades (bot_id, order_id, kind, side, price, quantity, timestamp, symbol)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING seq
            "#,
        )
        .bind(record.bot_id)
        .bind(&record.order_id)
        .bind(record.kind.to_string())
        .bind(record.side.to_string())
        .bind(record.price)
        .bind(record.quantity)
        .bind(record.timestamp)
        .bind(&record.symbol)
        .fetch_one(&self.pool)
        .await?;

        record.seq = seq;
        Ok(record)
    }

    async fn list_by_bot(&self, bot_id: BotId) -> Result<Vec<TradeRecord>, LedgerError> {
        let rows: Vec<TradeRow> = sqlx::query_as(
            r#"
            SELECT seq, bot_id, order_id, kind, side, price, quantity, timestamp, symbol
            FROM trades
            WHERE bot_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TradeRecord::try_from).collect()
    }

    async fn count_by_kind(&self, bot_id: BotId) -> Result<(u64, u64), LedgerError> {
        let (opens, closes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE kind = 'OPEN'),
                COUNT(*) FILTER (WHERE kind = 'CLOSE')
            FROM trades
            WHERE bot_id = $1
            "#,
        )
        .bind(bot_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((opens as u64, closes as u64))
    }
}

/// bots 테이블 행.
#[derive(sqlx::FromRow)]
struct BotRow {
    id: i64,
    name: String,
    pair: String,
    exchange: String,
    token: String,
    status: String,
    leverage_type: String,
    leverage_value: i32,
    order_sizing: String,
    start_balance: Decimal,
    stop_loss_pct: Decimal,
    stop_loss_enabled: bool,
    position: String,
    entry_price: Decimal,
    open_positions: i32,
    trades: i64,
    profit_pct: Decimal,
    current_balance: Decimal,
    last_signal: Option<String>,
    last_signal_time: Option<chrono::DateTime<chrono::Utc>>,
    pending_flip: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<BotRow> for Bot {
    type Error = LedgerError;

    fn try_from(row: BotRow) -> Result<Self, Self::Error> {
        let status: BotStatus = row.status.parse().map_err(LedgerError::Parse)?;
        let leverage_type: LeverageType = row.leverage_type.parse().map_err(LedgerError::Parse)?;
        let position: PositionState = row.position.parse().map_err(LedgerError::Parse)?;
        let order_sizing: OrderSizing = serde_json::from_str(&row.order_sizing)?;
        let pending_flip: Option<PendingFlip> = match row.pending_flip {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        Ok(Bot {
            id: row.id,
            name: row.name,
            pair: row.pair,
            exchange: row.exchange,
            token: row.token,
            status,
            leverage_type,
            leverage_value: row.leverage_value as u32,
            order_sizing,
            start_balance: row.start_balance,
            stop_loss_pct: row.stop_loss_pct,
            stop_loss_enabled: row.stop_loss_enabled,
            position,
            entry_price: row.entry_price,
            open_positions: row.open_positions as u32,
            trades: row.trades as u64,
            profit_pct: row.profit_pct,
            current_balance: row.current_balance,
            last_signal: row.last_signal,
            last_signal_time: row.last_signal_time,
            pending_flip,
            created_at: row.created_at,
        })
    }
}

const BOT_COLUMNS: &str = "id, name, pair, exchange, token, status, leverage_type, \
     leverage_value, order_sizing, start_balance, stop_loss_pct, stop_loss_enabled, \
     position, entry_price, open_positions, trades, profit_pct, current_balance, \
     last_signal, last_signal_time, pending_flip, created_at";

/// PostgreSQL 봇 저장소.
pub struct PgBotStore {
    pool: PgPool,
}

impl PgBotStore {
    /// 커넥션 풀로 생성.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BotStore for PgBotStore {
    async fn get(&self, bot_id: BotId) -> Result<Option<Bot>, LedgerError> {
        let row: Option<BotRow> =
            sqlx::query_as(&format!("SELECT {} FROM bots WHERE id = $1", BOT_COLUMNS))
                .bind(bot_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Bot::try_from).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Bot>, LedgerError> {
        let rows: Vec<BotRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bots WHERE status = 'active' ORDER BY id",
            BOT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Bot::try_from).collect()
    }

    async fn update(&self, bot: &Bot) -> Result<(), LedgerError> {
        let pending_flip = bot
            .pending_flip
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE bots SET
                name = $2, pair = $3, exchange = $4, token = $5, status = $6,
                leverage_type = $7, leverage_value = $8, order_sizing = $9,
                start_balance = $10, stop_loss_pct = $11, stop_loss_enabled = $12,
                position = $13, entry_price = $14, open_positions = $15,
                trades = $16, profit_pct = $17, current_balance = $18,
                last_signal = $19, last_signal_time = $20, pending_flip = $21
            WHERE id = $1
            "#,
        )
        .bind(bot.id)
        .bind(&bot.name)
        .bind(&bot.pair)
        .bind(&bot.exchange)
        .bind(&bot.token)
        .bind(bot.status.to_string())
        .bind(bot.leverage_type.to_string())
        .bind(bot.leverage_value as i32)
        .bind(serde_json::to_string(&bot.order_sizing)?)
        .bind(bot.start_balance)
        .bind(bot.stop_loss_pct)
        .bind(bot.stop_loss_enabled)
        .bind(bot.position.to_string())
        .bind(bot.entry_price)
        .bind(bot.open_positions as i32)
        .bind(bot.trades as i64)
        .bind(bot.profit_pct)
        .bind(bot.current_balance)
        .bind(&bot.last_signal)
        .bind(bot.last_signal_time)
        .bind(pending_flip)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::BotNotFound(bot.id));
        }
        Ok(())
    }

    async fn insert(&self, bot: &Bot) -> Result<(), LedgerError> {
        let pending_flip = bot
            .pending_flip
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(&format!(
            r#"
            INSERT INTO bots ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            "#,
            BOT_COLUMNS
        ))
        .bind(bot.id)
        .bind(&bot.name)
        .bind(&bot.pair)
        .bind(&bot.exchange)
        .bind(&bot.token)
        .bind(bot.status.to_string())
        .bind(bot.leverage_type.to_string())
        .bind(bot.leverage_value as i32)
        .bind(serde_json::to_string(&bot.order_sizing)?)
        .bind(bot.start_balance)
        .bind(bot.stop_loss_pct)
        .bind(bot.stop_loss_enabled)
        .bind(bot.position.to_string())
        .bind(bot.entry_price)
        .bind(bot.open_positions as i32)
        .bind(bot.trades as i64)
        .bind(bot.profit_pct)
        .bind(bot.current_balance)
        .bind(&bot.last_signal)
        .bind(bot.last_signal_time)
        .bind(pending_flip)
        .bind(bot.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tvtrader_core::TradeSide;

    use super::*;

    fn sample_bot(id: BotId, status: BotStatus) -> Bot {
        Bot {
            id,
            name: format!("bot-{}", id),
            pair: "BTCUSDT".to_string(),
            exchange: "Binance".to_string(),
            token: "secret".to_string(),
            status,
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

    #[tokio::test]
    async fn test_memory_trade_store_assigns_increasing_seq() {
        let store = MemoryTradeStore::new();

        let first = store
            .append(TradeRecord::new(
                1,
                "A",
                TradeKind::Open,
                TradeSide::Long,
                dec!(50000),
                dec!(0.002),
                "BTCUSDT",
            ))
            .await
            .unwrap();
        let second = store
            .append(TradeRecord::new(
                1,
                "B",
                TradeKind::Close,
                TradeSide::Long,
                dec!(52000),
                dec!(0.002),
                "BTCUSDT",
            ))
            .await
            .unwrap();

        assert!(second.seq > first.seq);

        let trades = store.list_by_bot(1).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].order_id, "A");
    }

    #[tokio::test]
    async fn test_memory_trade_store_filters_by_bot() {
        let store = MemoryTradeStore::new();
        for bot_id in [1, 2, 1] {
            store
                .append(TradeRecord::new(
                    bot_id,
                    "X",
                    TradeKind::Open,
                    TradeSide::Long,
                    dec!(100),
                    dec!(1),
                    "BTCUSDT",
                ))
                .await
                .unwrap();
        }

        assert_eq!(store.list_by_bot(1).await.unwrap().len(), 2);
        assert_eq!(store.list_by_bot(2).await.unwrap().len(), 1);
        let (opens, closes) = store.count_by_kind(1).await.unwrap();
        assert_eq!((opens, closes), (2, 0));
    }

    #[tokio::test]
    async fn test_memory_bot_store_list_active() {
        let store = MemoryBotStore::new();
        store.insert(&sample_bot(1, BotStatus::Active)).await.unwrap();
        store.insert(&sample_bot(2, BotStatus::Paused)).await.unwrap();
        store.insert(&sample_bot(3, BotStatus::Active)).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, 1);
        assert_eq!(active[1].id, 3);
    }

    #[tokio::test]
    async fn test_memory_bot_store_update_unknown_bot() {
        let store = MemoryBotStore::new();
        let bot = sample_bot(9, BotStatus::Active);
        let result = store.update(&bot).await;
        assert!(matches!(result, Err(LedgerError::BotNotFound(9))));
    }
}
