//! Wallet-creation rate limiter, per source IP.
//!
//! Creations beyond the hourly cap are refused; beyond the slow-down
//! threshold the handler sleeps briefly before answering.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::ServiceError;

const WINDOW: Duration = Duration::from_secs(3600);
const SLOW_DOWN_DELAY: Duration = Duration::from_secs(2);

pub struct RateLimiter {
    max_per_window: usize,
    slow_down_after: usize,
    hits: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, slow_down_after: usize) -> Self {
        Self { max_per_window, slow_down_after, hits: Mutex::new(HashMap::new()) }
    }

    /// Record a hit. Returns an optional delay the caller should sleep, or
    /// `RateLimited` when the cap is exhausted.
    pub fn check(&self, ip: IpAddr) -> Result<Option<Duration>, ServiceError> {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter poisoned");
        let entry = hits.entry(ip).or_default();
        entry.retain(|t| now.duration_since(*t) < WINDOW);

        if entry.len() >= self.max_per_window {
            return Err(ServiceError::RateLimited);
        }
        entry.push(now);

        if entry.len() > self.slow_down_after {
            Ok(Some(SLOW_DOWN_DELAY))
        } else {
            Ok(None)
        }
    }
}
