//! # Rate Limiter
//! Per-source sliding window of submission timestamps.
//!
//! One mutex guards the whole map, so recording a submission and reading the
//! resulting count is a single atomic step per key. Entries are created on the
//! first submission and purged `retain_secs` after the last one.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::RateLimitConfig;

/// Sweep idle entries after this many recorded submissions.
const SWEEP_EVERY: u64 = 256;

/// Lifecycle of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateState {
    /// Never seen (or purged).
    Fresh,
    /// Within the allowance.
    Tracked,
    /// More than `max_submissions` inside the window.
    RateLimited,
    /// Known source with nothing left inside the window.
    CooledDown,
}

/// Forced minimum action once the allowance is exceeded by a multiple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    Pending,
    Block,
}

/// Outcome of recording one submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateCheck {
    /// Submissions inside the window, this one included.
    pub in_window: usize,
    pub excess: usize,
    pub contribution: f32,
    pub forced: Option<Escalation>,
}

#[derive(Debug)]
struct RateWindow {
    hits: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl RateWindow {
    fn evict_old(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(&front) = self.hits.front() {
            if now - front >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.hits.iter().rev().take_while(|&&t| now - t < window).count()
    }
}

#[derive(Debug, Default)]
struct Inner {
    sources: HashMap<String, RateWindow>,
    recorded: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimitConfig,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.cfg
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.cfg.window_secs)
    }

    /// Record one submission from `source` at `now` and evaluate the window.
    pub fn record_and_check(&self, source: &str, now: DateTime<Utc>) -> RateCheck {
        let window = self.window();
        let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");

        inner.recorded += 1;
        if inner.recorded % SWEEP_EVERY == 0 {
            purge_idle(&mut inner.sources, now, Duration::seconds(self.cfg.retain_secs));
        }

        let entry = inner
            .sources
            .entry(source.to_string())
            .or_insert_with(|| RateWindow {
                hits: VecDeque::new(),
                last_seen: now,
            });
        entry.evict_old(now, window);
        entry.hits.push_back(now);
        if now > entry.last_seen {
            entry.last_seen = now;
        }
        let in_window = entry.count_within(now, window);
        drop(inner);

        self.evaluate(in_window)
    }

    /// What `record_and_check` would report for one more submission, without recording it.
    pub fn peek(&self, source: &str, now: DateTime<Utc>) -> RateCheck {
        let in_window = {
            let inner = self.inner.lock().expect("rate limiter mutex poisoned");
            inner
                .sources
                .get(source)
                .map_or(0, |w| w.count_within(now, self.window()))
        };
        self.evaluate(in_window + 1)
    }

    /// Score contribution and escalation for a window holding `in_window` submissions.
    pub fn evaluate(&self, in_window: usize) -> RateCheck {
        let c = &self.cfg;
        let excess = in_window.saturating_sub(c.max_submissions);
        let contribution = if excess == 0 {
            0.0
        } else {
            (c.base_score + c.step_score * (excess - 1) as f32).min(c.max_score)
        };
        let forced = if in_window >= c.max_submissions * c.block_multiplier {
            Some(Escalation::Block)
        } else if in_window >= c.max_submissions * c.pending_multiplier {
            Some(Escalation::Pending)
        } else {
            None
        };
        RateCheck {
            in_window,
            excess,
            contribution,
            forced,
        }
    }

    pub fn state(&self, source: &str, now: DateTime<Utc>) -> RateState {
        let inner = self.inner.lock().expect("rate limiter mutex poisoned");
        let Some(entry) = inner.sources.get(source) else {
            return RateState::Fresh;
        };
        if now - entry.last_seen > Duration::seconds(self.cfg.retain_secs) {
            return RateState::Fresh;
        }
        match entry.count_within(now, self.window()) {
            0 => RateState::CooledDown,
            n if n > self.cfg.max_submissions => RateState::RateLimited,
            _ => RateState::Tracked,
        }
    }

    /// Drop sources idle for longer than `retain_secs`. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");
        purge_idle(&mut inner.sources, now, Duration::seconds(self.cfg.retain_secs))
    }

    pub fn tracked_sources(&self) -> usize {
        self.inner
            .lock()
            .expect("rate limiter mutex poisoned")
            .sources
            .len()
    }

    /// Forget every source (cache clear).
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("rate limiter mutex poisoned")
            .sources
            .clear();
    }
}

fn purge_idle(
    sources: &mut HashMap<String, RateWindow>,
    now: DateTime<Utc>,
    retain: Duration,
) -> usize {
    let before = sources.len();
    sources.retain(|_, w| now - w.last_seen <= retain);
    before - sources.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn contribution_escalates_past_the_limit() {
        let rl = RateLimiter::new(RateLimitConfig::default());
        let mut last = 0.0;
        for i in 0..5 {
            let c = rl.record_and_check("ip", t0() + Duration::seconds(i));
            assert_eq!(c.contribution, 0.0);
            assert!(c.forced.is_none());
        }
        for i in 5..10 {
            let c = rl.record_and_check("ip", t0() + Duration::seconds(i));
            assert!(c.contribution > last, "submission {i}");
            last = c.contribution;
        }
        // 10th submission = 2x limit.
        assert_eq!(rl.evaluate(10).forced, Some(Escalation::Pending));
        assert_eq!(rl.evaluate(15).forced, Some(Escalation::Block));
        assert!((rl.evaluate(40).contribution - 0.6).abs() < 1e-6);
    }

    #[test]
    fn sources_are_independent() {
        let rl = RateLimiter::new(RateLimitConfig::default());
        for i in 0..8 {
            rl.record_and_check("a", t0() + Duration::seconds(i));
        }
        assert_eq!(rl.record_and_check("b", t0()).in_window, 1);
    }

    #[test]
    fn state_machine_is_time_driven() {
        let rl = RateLimiter::new(RateLimitConfig::default());
        assert_eq!(rl.state("ip", t0()), RateState::Fresh);

        rl.record_and_check("ip", t0());
        assert_eq!(rl.state("ip", t0()), RateState::Tracked);

        for i in 1..6 {
            rl.record_and_check("ip", t0() + Duration::seconds(i));
        }
        assert_eq!(rl.state("ip", t0() + Duration::seconds(10)), RateState::RateLimited);

        let after_window = t0() + Duration::seconds(3600 + 10);
        assert_eq!(rl.state("ip", after_window), RateState::CooledDown);

        let after_retain = t0() + Duration::seconds(24 * 3600 + 100);
        assert_eq!(rl.state("ip", after_retain), RateState::Fresh);
        assert_eq!(rl.sweep(after_retain), 1);
        assert_eq!(rl.tracked_sources(), 0);
    }

    #[test]
    fn window_slides() {
        let rl = RateLimiter::new(RateLimitConfig::default());
        for i in 0..5 {
            rl.record_and_check("ip", t0() + Duration::minutes(i * 10));
        }
        // First hit (t0) is exactly one window old and no longer counts.
        let c = rl.record_and_check("ip", t0() + Duration::minutes(60));
        assert_eq!(c.in_window, 5);
        assert_eq!(c.contribution, 0.0);
    }

    #[test]
    fn peek_reports_the_next_submission_without_recording() {
        let rl = RateLimiter::new(RateLimitConfig::default());
        for i in 0..5 {
            rl.record_and_check("ip", t0() + Duration::seconds(i));
        }
        let now = t0() + Duration::seconds(10);
        let peeked = rl.peek("ip", now);
        assert_eq!(peeked.in_window, 6);
        assert!(peeked.contribution > 0.0);
        assert_eq!(rl.peek("ip", now).in_window, 6);
        assert_eq!(rl.record_and_check("ip", now), peeked);
        assert_eq!(rl.peek("unseen", now).in_window, 1);
        assert_eq!(rl.tracked_sources(), 1);
    }

    #[test]
    fn clear_returns_every_source_to_fresh() {
        let rl = RateLimiter::new(RateLimitConfig::default());
        for i in 0..7 {
            rl.record_and_check("ip", t0() + Duration::seconds(i));
        }
        assert_eq!(rl.state("ip", t0() + Duration::seconds(8)), RateState::RateLimited);
        rl.clear();
        assert_eq!(rl.state("ip", t0() + Duration::seconds(8)), RateState::Fresh);
        assert_eq!(rl.tracked_sources(), 0);
        assert_eq!(rl.record_and_check("ip", t0() + Duration::seconds(9)).in_window, 1);
    }

    #[test]
    fn concurrent_submissions_are_not_undercounted() {
        let rl = std::sync::Arc::new(RateLimiter::new(RateLimitConfig::default()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let rl = rl.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    rl.record_and_check("shared", t0());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rl.record_and_check("shared", t0()).in_window, 201);
    }
}
