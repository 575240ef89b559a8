//! Per-platform rate limiting: cooldown between prompts and a daily prompt
//! quota that resets at the profile's configured time of day.

use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime};
use tracing::{debug, info};

use crate::errors::AutomationError;
use crate::profile::Limits;
use crate::types::QuotaSnapshot;

/// Result of an admission check. Checking never consumes quota; only
/// [`QuotaTracker::record_submission`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Wait(Duration),
}

/// Tracks one platform's usage against its limits.
///
/// Day boundaries are derived from `limits.reset_time`; crossing a boundary
/// resets the daily counters exactly once, whether or not anything was sent
/// that day, and repeated checks are idempotent.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    limits: Limits,
    prompts_sent_today: u32,
    tokens_sent_today: u64,
    last_prompt_at: Option<DateTime<Local>>,
    next_reset: DateTime<Local>,
}

fn next_reset_after(reset_time: NaiveTime, now: DateTime<Local>) -> DateTime<Local> {
    let today = now.date_naive().and_time(reset_time);
    let candidate = today
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or_else(|| now + chrono::Duration::days(1));
    if candidate > now {
        candidate
    } else {
        candidate
            .checked_add_days(Days::new(1))
            .unwrap_or(candidate + chrono::Duration::days(1))
    }
}

impl QuotaTracker {
    pub fn new(limits: Limits, now: DateTime<Local>) -> Result<Self, AutomationError> {
        if limits.cooldown_period < 0.0 {
            return Err(AutomationError::ProfileInvalid(
                "negative cooldown_period".to_string(),
            ));
        }
        let next_reset = next_reset_after(limits.reset_time, now);
        Ok(Self {
            limits,
            prompts_sent_today: 0,
            tokens_sent_today: 0,
            last_prompt_at: None,
            next_reset,
        })
    }

    /// Roll the day boundary forward if `now` has crossed it. Idempotent.
    fn roll_over(&mut self, now: DateTime<Local>) {
        while now >= self.next_reset {
            self.prompts_sent_today = 0;
            self.tokens_sent_today = 0;
            self.next_reset = next_reset_after(self.limits.reset_time, self.next_reset);
            info!(next_reset = %self.next_reset, "daily counters reset");
        }
    }

    /// Check whether a prompt may be sent at `now`.
    ///
    /// Two independent constraints: elapsed time since the last prompt must
    /// cover the cooldown period, and the daily quota must not be exhausted.
    /// The cooldown wait is reported first when both apply; callers re-check
    /// in a loop, so the quota wait surfaces on the next pass.
    pub fn admit(&mut self, now: DateTime<Local>) -> Admission {
        self.roll_over(now);

        if let Some(last) = self.last_prompt_at {
            let since = (now - last).to_std().unwrap_or(Duration::ZERO);
            let cooldown = self.limits.cooldown();
            if since < cooldown {
                let wait = cooldown - since;
                debug!(?wait, "cooldown still running");
                return Admission::Wait(wait);
            }
        }

        if self.prompts_sent_today >= self.limits.prompts_per_day {
            let wait = (self.next_reset - now).to_std().unwrap_or(Duration::ZERO);
            debug!(?wait, "daily quota exhausted, waiting for reset");
            return Admission::Wait(wait);
        }

        Admission::Allow
    }

    /// Record one accepted submission. Call only after the prompt actually
    /// went out.
    pub fn record_submission(&mut self, now: DateTime<Local>, token_count: u64) {
        self.roll_over(now);
        self.prompts_sent_today += 1;
        self.tokens_sent_today += token_count;
        self.last_prompt_at = Some(now);
        debug!(
            prompts = self.prompts_sent_today,
            tokens = self.tokens_sent_today,
            "usage recorded"
        );
    }

    pub fn prompts_sent_today(&self) -> u32 {
        self.prompts_sent_today
    }

    pub fn tokens_sent_today(&self) -> u64 {
        self.tokens_sent_today
    }

    pub fn snapshot(&mut self, now: DateTime<Local>) -> QuotaSnapshot {
        self.roll_over(now);
        let remaining_today = self
            .limits
            .prompts_per_day
            .saturating_sub(self.prompts_sent_today);
        let cooldown_over = self
            .last_prompt_at
            .map(|last| last + chrono::Duration::from_std(self.limits.cooldown()).unwrap_or_default())
            .unwrap_or(now);
        let next_allowed_at = if remaining_today == 0 {
            self.next_reset.max(cooldown_over)
        } else {
            cooldown_over.max(now)
        };
        QuotaSnapshot {
            remaining_today,
            next_allowed_at,
        }
    }
}
