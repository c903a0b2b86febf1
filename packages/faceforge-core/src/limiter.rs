use std::{
    collections::VecDeque,
    thread::sleep,
    time::{Duration, Instant},
};

use log::info;

/// Blocking sliding-window limiter: at most `capacity` takes per `window`.
///
/// The service behind the face search throttles aggressively, so the run
/// paces itself rather than burning retries.
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            stamps: VecDeque::with_capacity(capacity),
        }
    }

    /// Ten faces per ten minutes, the pace a full enhancement cycle sustains.
    pub fn per_face() -> Self {
        Self::new(10, Duration::from_secs(600))
    }

    /// Take one slot, sleeping until the window frees up if necessary.
    pub fn take(&mut self) {
        loop {
            let now = Instant::now();
            while let Some(front) = self.stamps.front() {
                if now.duration_since(*front) >= self.window {
                    self.stamps.pop_front();
                } else {
                    break;
                }
            }
            if self.stamps.len() < self.capacity {
                self.stamps.push_back(now);
                return;
            }
            // Sleep exactly until the oldest stamp ages out.
            if let Some(front) = self.stamps.front() {
                let wait = self.window.saturating_sub(now.duration_since(*front));
                info!("rate limit reached, pausing {:.1}s", wait.as_secs_f64());
                sleep(wait);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn takes_within_capacity_do_not_block() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.take();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn over_capacity_take_waits_for_the_window() {
        let window = Duration::from_millis(80);
        let mut limiter = RateLimiter::new(2, window);
        let start = Instant::now();
        limiter.take();
        limiter.take();
        limiter.take();
        assert!(start.elapsed() >= window, "elapsed {:?}", start.elapsed());
    }
}
