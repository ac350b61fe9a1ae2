/// Rate-limited work queue
/// Gates every call to a shared upstream service behind a token bucket
/// and a bounded concurrency permit
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use tokio::sync::Semaphore;

pub struct WorkQueue {
    semaphore: Semaphore,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl WorkQueue {
    /// Queue with at most `concurrency` in-flight operations and at most
    /// `per_second` submissions per second.
    pub fn new(concurrency: usize, per_second: u32) -> Self {
        let per_second = NonZeroU32::new(per_second.max(1)).unwrap();
        Self {
            semaphore: Semaphore::new(concurrency.max(1)),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    /// Defaults for the transaction provider: 2 concurrent, 2/s.
    pub fn provider_default() -> Self {
        Self {
            semaphore: Semaphore::new(2),
            limiter: RateLimiter::direct(Quota::per_second(nonzero!(2u32))),
        }
    }

    /// Run one operation through the queue. Each retry of a failed call
    /// must go through `run` again so it competes fairly for slots.
    pub async fn run<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        // Semaphore is never closed, so acquire cannot fail.
        let _permit = self.semaphore.acquire().await.unwrap();
        self.limiter.until_ready().await;
        operation().await
    }
}
