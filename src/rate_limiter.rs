//! Request rate limiting using a token bucket
//!
//! The RateLimiter bounds the aggregate request rate of every worker in a run.
//! All workers share one bucket, so the ceiling holds no matter how many
//! workers are configured.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Length of the window the rate is measured over
const WINDOW: Duration = Duration::from_secs(1);

/// Returned by [`RateLimiter::acquire`] when the run is cancelled while waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

/// Proof that a request slot was granted
#[derive(Debug, Clone, Copy)]
pub struct Permit {
    granted_at: Instant,
}

impl Permit {
    /// When the slot was granted
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

/// Global request limiter shared across all workers
///
/// # Algorithm
///
/// - The bucket holds `rate` tokens and starts full (burst = rate)
/// - Each granted request spends one token
/// - A spent token returns to the bucket exactly one second after it was granted
///
/// Because tokens return per grant instead of trickling back continuously, no
/// rolling one-second window ever contains more than `rate` grants. Callers
/// that find the bucket empty sleep until the oldest outstanding token returns,
/// racing that sleep against their cancellation token.
///
/// A rate of 0 disables limiting.
#[derive(Clone)]
pub struct RateLimiter {
    /// Requests per second (0 = unlimited)
    rate: u32,
    /// Grant instants still inside the current window, oldest first
    grants: Arc<Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a new RateLimiter allowing `rate_per_sec` requests per second
    ///
    /// # Examples
    ///
    /// ```
    /// use paper_harvest::rate_limiter::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(5);
    /// assert_eq!(limiter.limit(), Some(5));
    ///
    /// let unlimited = RateLimiter::new(0);
    /// assert_eq!(unlimited.limit(), None);
    /// ```
    #[must_use]
    pub fn new(rate_per_sec: u32) -> Self {
        Self {
            rate: rate_per_sec,
            grants: Arc::new(Mutex::new(VecDeque::with_capacity(rate_per_sec as usize))),
        }
    }

    /// Get the configured rate
    ///
    /// Returns None if unlimited, otherwise the limit in requests per second.
    pub fn limit(&self) -> Option<u32> {
        if self.rate == 0 { None } else { Some(self.rate) }
    }

    /// Tokens that could be granted right now without waiting
    pub fn available(&self) -> u32 {
        if self.rate == 0 {
            return u32::MAX;
        }
        let mut grants = self.grants.lock();
        Self::expire(&mut grants, Instant::now());
        self.rate.saturating_sub(grants.len() as u32)
    }

    /// Wait for a request slot
    ///
    /// Blocks until a token is available. Returns [`Cancelled`] promptly if the
    /// token fires while waiting; no slot is consumed in that case.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use paper_harvest::rate_limiter::RateLimiter;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn example() {
    /// let limiter = RateLimiter::new(5);
    /// let cancel = CancellationToken::new();
    ///
    /// // Before every outbound request
    /// if limiter.acquire(&cancel).await.is_ok() {
    ///     // ... issue the request ...
    /// }
    /// # }
    /// ```
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let wait = match self.try_acquire_at(Instant::now()) {
                Ok(permit) => return Ok(permit),
                Err(wait) => wait,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Take a token at `now`, or report how long until the next one returns
    fn try_acquire_at(&self, now: Instant) -> Result<Permit, Duration> {
        if self.rate == 0 {
            return Ok(Permit { granted_at: now });
        }

        let mut grants = self.grants.lock();
        Self::expire(&mut grants, now);

        if (grants.len() as u32) < self.rate {
            grants.push_back(now);
            return Ok(Permit { granted_at: now });
        }

        // Bucket empty: the oldest grant is the next token to come back
        let wait = grants
            .front()
            .map(|oldest| (*oldest + WINDOW).saturating_duration_since(now))
            .unwrap_or_default();
        Err(wait.max(Duration::from_millis(1)))
    }

    /// Return tokens whose grant has left the window
    fn expire(grants: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = grants.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                grants.pop_front();
            } else {
                break;
            }
        }
    }
}
