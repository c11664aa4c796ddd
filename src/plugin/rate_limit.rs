//! List rate limiter
//!
//! A token bucket shared by every fetch of a [`Plugin`](super::Plugin).
//! List handlers take one token before requesting each page after the first.

use crate::config::RateLimitConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: Option<RateLimitConfig>,
    bucket: Mutex<Bucket>,
    waits: AtomicU64,
}

impl RateLimiter {
    /// Start with a full bucket
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Some(config),
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.bucket_size),
                last_refill: Instant::now(),
            }),
            waits: AtomicU64::new(0),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self {
            config: None,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
            waits: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: Option<RateLimitConfig>) -> Self {
        match config {
            Some(config) => Self::new(config),
            None => Self::unlimited(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Number of times a caller had to wait for a token
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Take a token if one is available, otherwise return how long until one is
    fn take(&self, config: &RateLimitConfig) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * config.fill_rate).min(f64::from(config.bucket_size));
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (1.0 - bucket.tokens) / config.fill_rate,
            ))
        }
    }

    /// Take a token without waiting
    pub fn try_acquire(&self) -> bool {
        match &self.config {
            Some(config) => self.take(config).is_ok(),
            None => true,
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        let Some(config) = self.config else {
            return;
        };

        let mut waited = false;
        while let Err(delay) = self.take(&config) {
            if !waited {
                self.waits.fetch_add(1, Ordering::Relaxed);
                waited = true;
            }
            tracing::debug!("Rate limiter: waiting {:?} for a token", delay);
            tokio::time::sleep(delay).await;
        }
    }
}
