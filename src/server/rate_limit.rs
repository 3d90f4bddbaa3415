//! Per-client egress rate limiting
//!
//! Each dashboard connection owns a GCRA token bucket (governor crate)
//! with monotonic refill. Messages over the budget are dropped for that
//! client only and counted; the broadcast stream itself is never blocked.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;

pub struct ClientRateLimiter {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ClientRateLimiter {
    pub fn new(messages_per_sec: u32) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(messages_per_sec.max(1)).expect("clamped to at least 1"),
        );
        Self {
            limiter: GovernorRateLimiter::direct(quota),
        }
    }

    /// Whether one more message may be sent right now
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
