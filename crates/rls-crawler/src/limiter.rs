use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as DomainLock;
use tokio::time::{self, Instant};

use crate::config::LimiterConfig;

/// Request timestamps older than this are pruned from a domain's history.
const HISTORY_WINDOW: Duration = Duration::from_secs(60);

/// Per-domain admission control. `acquire` suspends the caller until a
/// request to that domain may be sent; callers for the same domain are
/// strictly serialized, callers for different domains never block each
/// other. An optional [`AdaptivePolicy`] adjusts each domain's target rate
/// from reported request outcomes.
#[derive(Debug)]
pub struct RateLimiter {
    conf: LimiterConfig,
    adaptive: Option<AdaptivePolicy>,
    domains: Mutex<HashMap<String, Arc<DomainLock<DomainState>>>>,
}

#[derive(Debug)]
struct DomainState {
    /// Target rate in requests per second, within [min_rate, max_rate].
    rate: f64,
    /// Admission timestamps, oldest first, bounded by HISTORY_WINDOW.
    history: Vec<Instant>,
    /// Admission is fully blocked until this instant when set.
    cooldown_until: Option<Instant>,
    successes: u32,
    failures: u32,
}

impl DomainState {
    fn new(rate: f64) -> Self {
        Self {
            rate,
            history: Vec::new(),
            cooldown_until: None,
            successes: 0,
            failures: 0,
        }
    }

    fn spacing(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate)
    }
}

impl RateLimiter {
    /// Fixed-rate limiter: `report` keeps counters but never moves the rate.
    pub fn new(conf: LimiterConfig) -> Self {
        Self {
            conf,
            adaptive: None,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter whose per-domain rate adapts to reported outcomes.
    pub fn adaptive(conf: LimiterConfig) -> Self {
        Self {
            adaptive: Some(AdaptivePolicy::new(conf.min_rate, conf.max_rate)),
            conf,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Build from config, adaptive or not as configured.
    pub fn from_config(conf: LimiterConfig) -> Self {
        if conf.adaptive {
            Self::adaptive(conf)
        } else {
            Self::new(conf)
        }
    }

    fn domain(&self, domain: &str) -> Arc<DomainLock<DomainState>> {
        let mut domains = self.domains.lock().unwrap();
        domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainLock::new(DomainState::new(self.conf.initial_rate))))
            .clone()
    }

    /// Suspend until a request to `domain` is admitted.
    pub async fn acquire(&self, domain: &str) {
        let state = self.domain(domain);
        let mut state = state.lock().await;

        // Pending cooldown first; it blocks admission entirely.
        if let Some(until) = state.cooldown_until.take() {
            if until > Instant::now() {
                time::sleep_until(until).await;
            }
        }

        let spacing = state.spacing();
        let now = Instant::now();
        let recent = state
            .history
            .iter()
            .filter(|t| now.duration_since(**t) < spacing)
            .count();

        if recent >= self.conf.burst_limit {
            // Burst exceeded: cooldown is a full reset for the domain.
            let until = now + self.conf.cooldown();
            state.cooldown_until = Some(until);
            time::sleep_until(until).await;
            state.cooldown_until = None;
            state.history.clear();
            log::warn!("burst limit hit for {domain}, cooled down for {:?}", self.conf.cooldown());
        } else if let Some(last) = state.history.last().copied() {
            let elapsed = now.duration_since(last);
            if elapsed < spacing {
                time::sleep(spacing - elapsed).await;
            }
        }

        let now = Instant::now();
        state.history.retain(|t| now.duration_since(*t) < HISTORY_WINDOW);
        state.history.push(now);

        // Desynchronize concurrent callers.
        time::sleep(self.conf.jitter.sample()).await;
    }

    /// Feed back one request outcome for `domain`. No-op on the rate unless
    /// the limiter was built adaptive.
    pub async fn report(&self, domain: &str, success: bool) {
        let Some(policy) = &self.adaptive else {
            return;
        };
        let state = self.domain(domain);
        let mut state = state.lock().await;

        match policy.observe(&mut state, success) {
            Adjustment::None => {}
            Adjustment::SpedUp => {
                log::info!("rate for {domain} increased to {:.3} req/s", state.rate);
            }
            Adjustment::Backoff => {
                // Repeated failures: slow down, forget recent history and
                // force a cooldown even though burst limits were not hit.
                state.history.clear();
                state.cooldown_until = Some(Instant::now() + self.conf.cooldown());
                log::warn!(
                    "repeated failures for {domain}, rate decreased to {:.3} req/s, cooling down",
                    state.rate
                );
            }
        }
    }

    /// Clear history and any active cooldown for `domain`. The target rate
    /// is left as-is.
    pub async fn reset(&self, domain: &str) {
        let state = self.domain(domain);
        let mut state = state.lock().await;
        state.history.clear();
        state.cooldown_until = None;
    }

    /// Current target rate for `domain` in requests per second.
    pub async fn current_rate(&self, domain: &str) -> f64 {
        self.domain(domain).lock().await.rate
    }
}

/// Feedback rules, separate from admission control so the fixed-rate
/// limiter stays free of them.
#[derive(Debug, Clone, Copy)]
struct AdaptivePolicy {
    min_rate: f64,
    max_rate: f64,
}

const GROWTH_FACTOR: f64 = 1.2;
const SHRINK_FACTOR: f64 = 0.5;
const SUCCESS_STREAK: u32 = 10;
const FAILURE_STREAK: u32 = 3;

enum Adjustment {
    None,
    SpedUp,
    Backoff,
}

impl AdaptivePolicy {
    fn new(min_rate: f64, max_rate: f64) -> Self {
        Self { min_rate, max_rate }
    }

    // Success and failure streaks are counted independently: a success does
    // not clear the failure streak, nor the other way around.
    fn observe(&self, state: &mut DomainState, success: bool) -> Adjustment {
        if success {
            state.successes += 1;
            if state.successes >= SUCCESS_STREAK {
                state.successes = 0;
                state.rate = (state.rate * GROWTH_FACTOR).min(self.max_rate);
                return Adjustment::SpedUp;
            }
        } else {
            state.failures += 1;
            if state.failures >= FAILURE_STREAK {
                state.failures = 0;
                state.rate = (state.rate * SHRINK_FACTOR).max(self.min_rate);
                return Adjustment::Backoff;
            }
        }
        Adjustment::None
    }
}
