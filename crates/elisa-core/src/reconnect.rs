//! Capped exponential reconnect policy for live-channel transports.
//!
//! Base 1 s, factor 2, capped at 30 s, at most 10 attempts, reset on a
//! successful open. Task-level retries elsewhere in the engine are
//! immediate; this policy applies only at the connection level.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    factor: u32,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            attempt: 0,
        }
    }
}

impl ReconnectPolicy {
    #[cfg(test)]
    pub fn with_timing(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
            ..Default::default()
        }
    }

    /// Delay before the next attempt, or `None` once the attempt cap is
    /// reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let exponent = self.factor.saturating_pow(self.attempt);
        let delay = self
            .base
            .saturating_mul(exponent)
            .min(self.max_delay);
        self.attempt += 1;
        Some(delay)
    }

    /// Called after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempt
    }
}

/// Drive `connect` under the policy until it succeeds or attempts are
/// exhausted. Logs a warning and returns `None` on give-up.
pub async fn with_reconnect<F, Fut, T>(
    label: &str,
    policy: &mut ReconnectPolicy,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match connect().await {
            Ok(value) => {
                policy.reset();
                return Some(value);
            }
            Err(e) => match policy.next_delay() {
                Some(delay) => {
                    tracing::debug!(label, error = %e, delay_ms = delay.as_millis() as u64, "reconnecting");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!(label, error = %e, "giving up after repeated connection failures");
                    return None;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn delays_follow_capped_exponential_ladder() {
        let mut policy = ReconnectPolicy::default();
        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30, 30, 30]);
        // Attempt 11 is never made.
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn reset_restarts_the_ladder() {
        let mut policy = ReconnectPolicy::default();
        policy.next_delay();
        policy.next_delay();
        policy.reset();
        assert_eq!(policy.next_delay().unwrap().as_secs(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_cap() {
        let mut policy = ReconnectPolicy::with_timing(
            Duration::from_millis(1),
            Duration::from_millis(2),
            3,
        );
        let mut calls = 0u32;
        let result: Option<()> = with_reconnect("test", &mut policy, || {
            calls += 1;
            async { Err(anyhow!("closed")) }
        })
        .await;
        assert!(result.is_none());
        // Initial try plus one per allowed delay.
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn success_resets_the_counter() {
        let mut policy = ReconnectPolicy::with_timing(
            Duration::from_millis(1),
            Duration::from_millis(2),
            5,
        );
        let mut calls = 0u32;
        let result = with_reconnect("test", &mut policy, || {
            calls += 1;
            let ok = calls >= 3;
            async move {
                if ok {
                    Ok(42)
                } else {
                    Err(anyhow!("closed"))
                }
            }
        })
        .await;
        assert_eq!(result, Some(42));
        assert_eq!(policy.attempts_used(), 0);
    }
}
