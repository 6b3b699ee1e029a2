//! Fixed-window rate limiter for the submission entry point.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{GatewayError, Result};

struct Window {
    started: Instant,
    count: u32,
}

/// Per-client-address fixed-window counter. Each key's window starts at its
/// first request; requests beyond the threshold inside the window are
/// rejected. Boundary bursts across adjacent windows are an accepted
/// trade-off of the fixed-window scheme.
pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
    window: Duration,
    max: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            max,
        }
    }

    /// Count one request from `key`. The check-and-increment is atomic with
    /// respect to concurrent requests from the same key.
    pub fn check(&self, key: IpAddr) -> Result<()> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();

        // Opportunistically drop stale windows so the map stays bounded.
        if windows.len() > 1024 {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        match windows.get_mut(&key) {
            Some(w) if now.duration_since(w.started) < self.window => {
                if w.count >= self.max {
                    return Err(GatewayError::RateLimited(self.max));
                }
                w.count += 1;
            }
            _ => {
                windows.insert(key, Window { started: now, count: 1 });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    #[test]
    fn allows_up_to_threshold_then_rejects() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 10);
        for _ in 0..10 {
            limiter.check(client()).unwrap();
        }
        assert!(matches!(
            limiter.check(client()),
            Err(GatewayError::RateLimited(_))
        ));
    }

    #[test]
    fn window_resets_after_elapsing() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 2);
        limiter.check(client()).unwrap();
        limiter.check(client()).unwrap();
        assert!(limiter.check(client()).is_err());

        std::thread::sleep(Duration::from_millis(25));
        limiter.check(client()).unwrap();
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        limiter.check(client()).unwrap();
        limiter.check("198.51.100.1".parse().unwrap()).unwrap();
        assert!(limiter.check(client()).is_err());
    }
}
