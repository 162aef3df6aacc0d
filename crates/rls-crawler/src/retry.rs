use std::time::Duration;

use crate::config::RetryConfig;

/// Stateless retry decision: given how many attempts have failed so far,
/// either wait-and-retry or give up. Backoff doubles per attempt, with
/// optional uniform jitter on top and a configurable ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    conf: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    pub fn new(conf: RetryConfig) -> Self {
        Self { conf }
    }

    /// `attempt` is the number of attempts that have failed, starting at 1.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.conf.max_attempts {
            return RetryDecision::GiveUp;
        }

        let mut delay = self.conf.base_delay_secs * f64::powi(2.0, attempt as i32);
        if let Some(jitter) = &self.conf.jitter {
            delay += jitter.sample().as_secs_f64();
        }
        let delay = delay.min(self.conf.max_delay_secs);
        RetryDecision::RetryAfter(Duration::from_secs_f64(delay))
    }

    pub fn max_attempts(&self) -> u32 {
        self.conf.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayRange;

    fn plain(max_attempts: u32, base: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay_secs: base,
            jitter: None,
            max_delay_secs: 300.0,
        })
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = plain(4, 5.0);
        assert_eq!(
            policy.decide(1),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            policy.decide(2),
            RetryDecision::RetryAfter(Duration::from_secs(20))
        );
        assert_eq!(
            policy.decide(3),
            RetryDecision::RetryAfter(Duration::from_secs(40))
        );
    }

    #[test]
    fn budget_exhaustion_gives_up() {
        let policy = plain(3, 5.0);
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(4), RetryDecision::GiveUp);
    }

    #[test]
    fn jitter_stays_within_range() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay_secs: 10.0,
            jitter: Some(DelayRange {
                min_secs: 1.0,
                max_secs: 5.0,
            }),
            max_delay_secs: 300.0,
        });
        for _ in 0..50 {
            match policy.decide(1) {
                RetryDecision::RetryAfter(d) => {
                    assert!(d >= Duration::from_secs(21));
                    assert!(d <= Duration::from_secs(25));
                }
                RetryDecision::GiveUp => panic!("should retry"),
            }
        }
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 10,
            base_delay_secs: 10.0,
            jitter: None,
            max_delay_secs: 120.0,
        });
        assert_eq!(
            policy.decide(6),
            RetryDecision::RetryAfter(Duration::from_secs(120))
        );
    }
}
