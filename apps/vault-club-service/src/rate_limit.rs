use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 3_600;

/// Fixed-window request counter keyed by caller.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, WindowCount>>,
}

#[derive(Debug, Clone, Copy)]
struct WindowCount {
    started_at: DateTime<Utc>,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_seconds: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        let window_seconds =
            i64::try_from(window_seconds.clamp(1, MAX_WINDOW_SECONDS)).unwrap_or(3_600);
        Self {
            max_requests: max_requests.max(1),
            window: Duration::seconds(window_seconds),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check(&self, key: &str, now: DateTime<Utc>) -> Result<(), RateLimited> {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, entry| now - entry.started_at < self.window);

        let entry = windows.entry(key.to_string()).or_insert(WindowCount {
            started_at: now,
            count: 0,
        });
        if entry.count >= self.max_requests {
            let remaining = (entry.started_at + self.window - now).num_seconds().max(1);
            return Err(RateLimited {
                retry_after_seconds: u64::try_from(remaining).unwrap_or(1),
            });
        }
        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Context, Result};
    use chrono::TimeZone;

    use super::*;

    fn start() -> Result<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2025, 3, 12, 9, 0, 0)
            .single()
            .context("valid timestamp")
    }

    #[tokio::test]
    async fn limits_each_key_within_the_window() -> Result<()> {
        let limiter = RateLimiter::new(2, 60);
        let now = start()?;
        assert_eq!(limiter.check("user:a", now).await, Ok(()));
        assert_eq!(limiter.check("user:a", now).await, Ok(()));
        assert_eq!(
            limiter.check("user:a", now + Duration::seconds(15)).await,
            Err(RateLimited {
                retry_after_seconds: 45
            })
        );
        assert_eq!(limiter.check("user:b", now).await, Ok(()));
        Ok(())
    }

    #[tokio::test]
    async fn window_resets_after_it_elapses() -> Result<()> {
        let limiter = RateLimiter::new(1, 60);
        let now = start()?;
        assert_eq!(limiter.check("user:a", now).await, Ok(()));
        assert!(limiter.check("user:a", now).await.is_err());
        assert_eq!(
            limiter.check("user:a", now + Duration::seconds(60)).await,
            Ok(())
        );
        Ok(())
    }
}
