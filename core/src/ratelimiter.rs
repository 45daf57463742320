use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Token bucket shared by probe tasks. Clones share the bucket.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    sem: Arc<Semaphore>,
    refill: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.refill.abort();
    }
}

impl RateLimiter {
    /// Must be called from within a tokio runtime.
    pub fn new(tokens_per_sec: u32) -> Self {
        let rate = tokens_per_sec.max(1);
        let burst = rate as usize;
        let sem = Arc::new(Semaphore::new(0));
        let sem_bg = sem.clone();
        // the timer cannot tick faster than once per microsecond; above 1M/s
        // each tick hands out a batch instead
        let interval = Duration::from_micros((1_000_000 / rate as u64).max(1));
        let per_tick = (rate as u64).div_ceil(1_000_000) as usize;
        let refill = tokio::spawn(async move {
            let mut t = tokio::time::interval(interval);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                t.tick().await;
                // idle periods must not bank more than one second of tokens
                let room = burst.saturating_sub(sem_bg.available_permits());
                if room > 0 {
                    sem_bg.add_permits(per_tick.min(room));
                }
            }
        });
        RateLimiter { inner: Arc::new(Inner { sem, refill }) }
    }

    pub async fn acquire(&self) {
        if let Ok(permit) = self.inner.sem.acquire().await {
            permit.forget();
        }
    }
}
