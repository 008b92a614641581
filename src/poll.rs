use std::{
    thread,
    time::{Duration, Instant},
};

use log::debug;

use crate::error::{Error, Result};

/// 時間來源與暫停能力，輪詢只透過這裡取得時間與等待。
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// 實際時鐘，`sleep` 會阻塞目前執行緒。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 輪詢間隔與總等待時間，由呼叫端決定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL, Self::DEFAULT_TIMEOUT)
    }
}

/// 重複呼叫 `refresh` 直到它回傳的狀態不再是 `waiting_on`。
///
/// 進入迴圈前先算出截止時間，每一輪檢查一次，等待不會越過截止時間；
/// 逾時回傳 [`Error::Timeout`]，不會中斷進行中的請求。
pub(crate) fn poll_status<F>(
    clock: &dyn Clock,
    settings: &PollSettings,
    waiting_on: &str,
    mut refresh: F,
) -> Result<String>
where
    F: FnMut() -> Result<String>,
{
    let started = clock.now();
    let deadline = started + settings.timeout;

    loop {
        let status = refresh()?;
        if status != waiting_on {
            return Ok(status);
        }

        let now = clock.now();
        if now >= deadline {
            return Err(Error::Timeout {
                waited: now.duration_since(started),
                status: waiting_on.to_string(),
            });
        }

        let pause = settings.interval.min(deadline - now);
        debug!("Status is still `{waiting_on}`, retrying in {pause:?}");
        clock.sleep(pause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::MockClock;

    #[test]
    fn test_returns_first_non_waiting_status() -> Result<()> {
        let clock = MockClock::new();
        let mut statuses = vec!["pending", "pending", "ready"].into_iter();
        let settings = PollSettings::new(Duration::from_secs(5), Duration::from_secs(60));

        let status = poll_status(&clock, &settings, "pending", || {
            Ok(statuses.next().unwrap_or("pending").to_string())
        })?;

        assert_eq!(status, "ready");
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn test_deadline_raises_timeout() {
        let clock = MockClock::new();
        let settings = PollSettings::new(Duration::from_secs(5), Duration::from_secs(12));
        let mut calls = 0;

        let result = poll_status(&clock, &settings, "processing", || {
            calls += 1;
            Ok("processing".to_string())
        });

        assert!(matches!(
            result,
            Err(Error::Timeout { ref status, waited })
                if status == "processing" && waited == Duration::from_secs(12)
        ));
        assert_eq!(calls, 4);
        assert_eq!(clock.elapsed(), Duration::from_secs(12));
    }

    #[test]
    fn test_refresh_error_stops_polling() {
        let clock = MockClock::new();
        let result = poll_status(&clock, &PollSettings::default(), "pending", || {
            Err(Error::malformed("broken"))
        });

        assert!(matches!(result, Err(Error::MalformedResponse(_))));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
