use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// 현재 시각을 제공하는 트레이트
///
/// 만료 계산은 모두 이 트레이트로 얻은 시각을 기준으로 하며, 테스트에서는 [`ManualClock`]으로 임의의 시각을 흉내 낸다.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

impl<F> Clock for F where F: Fn() -> DateTime<Utc> {
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// 시스템 시계
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 직접 시각을 설정하고 앞으로 돌릴 수 있는 시계
///
/// 복제본끼리 같은 시각을 공유한다.
///
/// # Example
/// ```
/// use book_swap_rust::clock::{Clock, ManualClock};
/// use chrono::{Duration, TimeZone, Utc};
///
/// let start = Utc.with_ymd_and_hms(2025, 10, 28, 10, 0, 0).unwrap();
/// let clock = ManualClock::new(start);
/// let shared = clock.clone();
///
/// clock.advance(Duration::hours(47));
/// assert_eq!(shared.now(), start + Duration::hours(47));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = *now + duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
