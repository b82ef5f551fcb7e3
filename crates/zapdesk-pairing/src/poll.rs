//! QR poll loop, the fallback channel when push delivery is slow or lost.
//!
//! The loop checks its cancellation token before each attempt and again
//! before applying a response, so a QR delivered by push stops it without
//! further requests and a late response is discarded.

use crate::error::PollError;
use crate::qr::{normalize_qr, QrFields, QrImage};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use zapdesk_core::config::ClientConfig;

/// One QR endpoint response, by status.
#[derive(Debug, Clone, PartialEq)]
pub enum QrPoll {
    /// 2xx with a body.
    Ready(QrFields),
    /// 404: the server has not produced a QR yet.
    NotReady,
    /// 429.
    RateLimited,
}

/// Fetches the latest QR for an account. Non-2xx other than 404/429 maps to
/// `PollError::Http`.
#[async_trait]
pub trait QrFetcher: Send + Sync {
    async fn fetch_qr(&self, account_id: Uuid) -> Result<QrPoll, PollError>;
}

/// Timing of the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSchedule {
    pub initial_delay: Duration,
    pub fast_interval: Duration,
    pub fast_attempts: u32,
    pub slow_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl PollSchedule {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            initial_delay: config.initial_poll_delay(),
            fast_interval: Duration::from_millis(config.fast_poll_interval_ms),
            fast_attempts: config.fast_poll_attempts,
            slow_interval: Duration::from_millis(config.slow_poll_interval_ms),
            max_attempts: config.max_poll_attempts,
        }
    }

    /// Wait after attempt number `attempt` (1-based).
    pub fn interval_after(&self, attempt: u32) -> Duration {
        if attempt < self.fast_attempts {
            self.fast_interval
        } else {
            self.slow_interval
        }
    }

    /// Upper bound of the whole loop, ignoring request latency.
    pub fn total_budget(&self) -> Duration {
        (1..self.max_attempts).fold(self.initial_delay, |acc, n| acc + self.interval_after(n))
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Poll until a QR arrives, the budget runs out, or `cancel` fires.
///
/// `Ok(None)` means cancelled. 404 and 429 count against the budget; any
/// other error status aborts.
pub async fn poll_for_qr(
    fetcher: &dyn QrFetcher,
    account_id: Uuid,
    schedule: &PollSchedule,
    cancel: &CancellationToken,
) -> Result<Option<QrImage>, PollError> {
    if !pause(schedule.initial_delay, cancel).await {
        return Ok(None);
    }

    for attempt in 1..=schedule.max_attempts {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let outcome = fetcher.fetch_qr(account_id).await;
        if cancel.is_cancelled() {
            debug!("discarding qr poll response that arrived after cancellation");
            return Ok(None);
        }

        let mut wait = schedule.interval_after(attempt);
        match outcome? {
            QrPoll::Ready(fields) => match normalize_qr(&fields) {
                Some(qr) => {
                    debug!("qr obtained by polling on attempt {attempt}");
                    return Ok(Some(qr));
                }
                None => debug!("qr poll {attempt}: empty payload"),
            },
            QrPoll::NotReady => debug!("qr poll {attempt}: not ready"),
            QrPoll::RateLimited => {
                warn!("qr poll {attempt}: rate limited, backing off");
                wait = wait.max(schedule.slow_interval);
            }
        }

        if attempt < schedule.max_attempts && !pause(wait, cancel).await {
            return Ok(None);
        }
    }

    Err(PollError::TimedOut {
        attempts: schedule.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Replies with a fixed outcome and counts calls.
    struct Scripted {
        calls: AtomicU32,
        reply: Box<dyn Fn(u32) -> Result<QrPoll, PollError> + Send + Sync>,
    }

    impl Scripted {
        fn new(reply: impl Fn(u32) -> Result<QrPoll, PollError> + Send + Sync + 'static) -> Self {
            Self {
                calls: AtomicU32::new(0),
                reply: Box::new(reply),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QrFetcher for Scripted {
        async fn fetch_qr(&self, _account_id: Uuid) -> Result<QrPoll, PollError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.reply)(n)
        }
    }

    fn quick(max_attempts: u32) -> PollSchedule {
        PollSchedule {
            initial_delay: Duration::from_millis(5),
            fast_interval: Duration::from_millis(2),
            fast_attempts: 3,
            slow_interval: Duration::from_millis(4),
            max_attempts,
        }
    }

    #[test]
    fn test_default_schedule_budget() {
        let s = PollSchedule::default();
        assert_eq!(s.max_attempts, 45);
        assert_eq!(s.interval_after(1), Duration::from_secs(1));
        assert_eq!(s.interval_after(10), Duration::from_secs(2));
        let total = s.total_budget().as_secs();
        assert!((80..=95).contains(&total), "total {total}s");
    }

    #[tokio::test]
    async fn test_persistent_404_stops_at_budget() {
        let fetcher = Scripted::new(|_| Ok(QrPoll::NotReady));
        let err = poll_for_qr(&fetcher, Uuid::new_v4(), &quick(7), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PollError::TimedOut { attempts: 7 });
        assert_eq!(fetcher.calls(), 7);
    }

    #[tokio::test]
    async fn test_rate_limit_counts_against_budget() {
        let fetcher = Scripted::new(|n| {
            if n < 3 {
                Ok(QrPoll::RateLimited)
            } else {
                Ok(QrPoll::Ready(QrFields {
                    qr_code: Some("data:image/png;base64,QQ==".into()),
                    ..Default::default()
                }))
            }
        });
        let qr = poll_for_qr(&fetcher, Uuid::new_v4(), &quick(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            qr.map(|q| q.image).as_deref(),
            Some("data:image/png;base64,QQ==")
        );
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_hard_error_aborts() {
        let fetcher = Scripted::new(|_| Err(PollError::Http { status: 500 }));
        let err = poll_for_qr(&fetcher, Uuid::new_v4(), &quick(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PollError::Http { status: 500 });
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_attempt() {
        let fetcher = Scripted::new(|_| Ok(QrPoll::NotReady));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = poll_for_qr(&fetcher, Uuid::new_v4(), &quick(10), &cancel)
            .await
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_loop_stops_requests() {
        let fetcher = Arc::new(Scripted::new(|_| Ok(QrPoll::NotReady)));
        let cancel = CancellationToken::new();
        let schedule = PollSchedule {
            initial_delay: Duration::from_millis(1),
            fast_interval: Duration::from_millis(20),
            fast_attempts: 100,
            slow_interval: Duration::from_millis(20),
            max_attempts: 100,
        };
        let task = {
            let fetcher = fetcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                poll_for_qr(fetcher.as_ref(), Uuid::new_v4(), &schedule, &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let seen = fetcher.calls();
        assert_eq!(task.await.unwrap(), Ok(None));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fetcher.calls(), seen);
    }
}
