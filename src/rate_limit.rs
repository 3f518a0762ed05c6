//! In-memory cooldown gate with per-channel and per-user windows.
//!
//! Sized for a single bot process; state is lost on restart, which only
//! means the first post-restart reaction comes a little early.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CHANNEL_COOLDOWN: Duration = Duration::from_secs(120);
const USER_COOLDOWN: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    channel_cooldown: Duration,
    user_cooldown: Duration,
    last_channel: Mutex<HashMap<(u64, u64), Instant>>,
    last_user: Mutex<HashMap<(u64, u64), Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::with_cooldowns(CHANNEL_COOLDOWN, USER_COOLDOWN)
    }
}

impl RateLimiter {
    fn with_cooldowns(channel_cooldown: Duration, user_cooldown: Duration) -> Self {
        Self {
            channel_cooldown,
            user_cooldown,
            last_channel: Mutex::new(HashMap::new()),
            last_user: Mutex::new(HashMap::new()),
        }
    }

    /// Whether both the channel and the user are off cooldown. Does not
    /// consume the slot; call `mark` once the action actually happens.
    pub fn allow(&self, guild_id: u64, channel_id: u64, user_id: u64) -> bool {
        let channel_ok = self
            .last_channel
            .lock()
            .unwrap()
            .get(&(guild_id, channel_id))
            .is_none_or(|last| last.elapsed() >= self.channel_cooldown);
        if !channel_ok {
            return false;
        }
        self.last_user
            .lock()
            .unwrap()
            .get(&(guild_id, user_id))
            .is_none_or(|last| last.elapsed() >= self.user_cooldown)
    }

    pub fn mark(&self, guild_id: u64, channel_id: u64, user_id: u64) {
        let now = Instant::now();
        self.last_channel
            .lock()
            .unwrap()
            .insert((guild_id, channel_id), now);
        self.last_user.lock().unwrap().insert((guild_id, user_id), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_allows() {
        let limiter = RateLimiter::default();
        assert!(limiter.allow(1, 10, 7));
    }

    #[test]
    fn test_channel_cooldown_blocks_everyone() {
        let limiter = RateLimiter::default();
        limiter.mark(1, 10, 7);
        assert!(!limiter.allow(1, 10, 7));
        // Different user, same channel: still blocked
        assert!(!limiter.allow(1, 10, 8));
        // Different channel is independent
        assert!(limiter.allow(1, 11, 8));
    }

    #[test]
    fn test_user_cooldown_follows_across_channels() {
        let limiter = RateLimiter::default();
        limiter.mark(1, 10, 7);
        // Same user in another channel of the guild: blocked by user cooldown
        assert!(!limiter.allow(1, 11, 7));
    }

    #[test]
    fn test_allow_does_not_consume() {
        let limiter = RateLimiter::default();
        assert!(limiter.allow(1, 10, 7));
        assert!(limiter.allow(1, 10, 7));
    }

    #[test]
    fn test_zero_cooldown_always_allows() {
        let limiter = RateLimiter::with_cooldowns(Duration::ZERO, Duration::ZERO);
        limiter.mark(1, 10, 7);
        assert!(limiter.allow(1, 10, 7));
    }
}
