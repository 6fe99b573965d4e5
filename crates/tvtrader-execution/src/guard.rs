//! 봇별 동시성 가드.
//!
//! 봇 하나당 시그널 처리는 동시에 1건만 허용됩니다. 두 번째 시그널은
//! 대기하지 않고 즉시 거부됩니다 (얼럿 서비스가 재전송). 처리 시도가
//! 성공하든 실패하든 쿨다운 윈도우가 시작되어 봇당 주문 제출 속도를
//! 제한하고 중복 얼럿을 흡수합니다.
//!
//! 가드 상태는 프로세스 로컬입니다. 각 봇은 엔진 인스턴스 하나에만
//! 소유되므로 프로세스 간 조정이 필요 없습니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use tvtrader_core::BotId;

/// 기본 쿨다운 (3초).
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// 봇별 가드 슬롯.
///
/// 읽기-후-쓰기 경합을 배제하기 위해 admission은 compare-and-swap으로만
/// 수행됩니다.
#[derive(Debug)]
struct BotSlot {
    in_flight: AtomicBool,
    /// 쿨다운 만료 시각 (unix millis, 0이면 없음)
    cooldown_until_ms: AtomicI64,
}

impl BotSlot {
    fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            cooldown_until_ms: AtomicI64::new(0),
        }
    }
}

/// admission 결과.
#[derive(Debug)]
pub enum Admission {
    /// 허가. permit이 drop될 때 쿨다운이 시작됩니다.
    Granted(SignalPermit),
    /// 같은 봇의 시그널이 이미 처리 중.
    Busy,
    /// 쿨다운 중. 남은 대기 시간 포함.
    Cooldown { wait: Duration },
}

/// 시그널 처리 permit (RAII).
///
/// drop 시 in-flight 플래그를 해제하고 쿨다운 만료 시각을 기록합니다.
/// 성공/실패 경로 모두 drop을 거치므로 쿨다운은 항상 적용됩니다.
#[derive(Debug)]
pub struct SignalPermit {
    slot: Arc<BotSlot>,
    cooldown: Duration,
}

impl Drop for SignalPermit {
    fn drop(&mut self) {
        let until = Utc::now().timestamp_millis() + self.cooldown.as_millis() as i64;
        self.slot.cooldown_until_ms.store(until, Ordering::SeqCst);
        self.slot.in_flight.store(false, Ordering::SeqCst);
    }
}

/// 유지보수 permit (RAII).
///
/// 리컨실러가 시그널 처리와의 동시 실행을 배제할 때 사용합니다.
/// drop 시 쿨다운 없이 in-flight 플래그만 해제합니다.
#[derive(Debug)]
pub struct MaintenancePermit {
    slot: Arc<BotSlot>,
}

impl Drop for MaintenancePermit {
    fn drop(&mut self) {
        self.slot.in_flight.store(false, Ordering::SeqCst);
    }
}

/// 봇별 동시성 가드.
pub struct SignalGuard {
    slots: RwLock<HashMap<BotId, Arc<BotSlot>>>,
    cooldown: Duration,
}

impl SignalGuard {
    /// 기본 쿨다운(3초)으로 생성.
    pub fn new() -> Self {
        Self::with_cooldown(DEFAULT_COOLDOWN)
    }

    /// 쿨다운을 지정하여 생성.
    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            cooldown,
        }
    }

    /// 설정된 쿨다운.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    async fn slot(&self, bot_id: BotId) -> Arc<BotSlot> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(&bot_id) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(bot_id).or_insert_with(|| Arc::new(BotSlot::new())))
    }

    /// 시그널 처리 admission 시도.
    ///
    /// 쿨다운 검사 후 in-flight 플래그를 CAS로 점유합니다.
    pub async fn try_admit(&self, bot_id: BotId) -> Admission {
        let slot = self.slot(bot_id).await;

        let now = Utc::now().timestamp_millis();
        let until = slot.cooldown_until_ms.load(Ordering::SeqCst);
        if until > now {
            return Admission::Cooldown {
                wait: Duration::from_millis((until - now) as u64),
            };
        }

        if slot
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Admission::Busy;
        }

        Admission::Granted(SignalPermit {
            slot,
            cooldown: self.cooldown,
        })
    }

    /// 유지보수 admission 시도 (쿨다운 무시, 쿨다운 미발생).
    ///
    /// 처리 중인 시그널이 있으면 `None`을 반환합니다.
    pub async fn try_enter_maintenance(&self, bot_id: BotId) -> Option<MaintenancePermit> {
        let slot = self.slot(bot_id).await;
        if slot
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        Some(MaintenancePermit { slot })
    }
}

impl Default for SignalGuard {
    fn default() -> Self {
        Self::new()
    }
}
