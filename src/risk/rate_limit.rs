use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Fixed-window per-account counter. Checks never block: callers get a yes or
/// no immediately and a full window simply rejects until it rolls over.
pub struct RateLimiter {
    window: Duration,
    max_per_window: u32,
    accounts: HashMap<String, WindowCount>,
}

struct WindowCount {
    started: DateTime<Utc>,
    count: u32,
}

impl RateLimiter {
    pub fn hourly(max_per_window: u32) -> Self {
        Self::new(Duration::hours(1), max_per_window)
    }

    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            accounts: HashMap::new(),
        }
    }

    pub fn set_max(&mut self, max_per_window: u32) {
        self.max_per_window = max_per_window;
    }

    /// Would one more event for `account` fit in the current window?
    pub fn check(&self, account: &str, now: DateTime<Utc>) -> bool {
        match self.accounts.get(account) {
            Some(w) if now - w.started < self.window => w.count < self.max_per_window,
            _ => self.max_per_window > 0,
        }
    }

    /// Count one event. Returns false (and counts nothing) when the window is full.
    pub fn try_acquire(&mut self, account: &str, now: DateTime<Utc>) -> bool {
        let window = self.window;
        let entry = self
            .accounts
            .entry(account.to_string())
            .or_insert(WindowCount {
                started: now,
                count: 0,
            });
        if now - entry.started >= window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.max_per_window {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Undo one counted event in the current window.
    pub fn release(&mut self, account: &str, now: DateTime<Utc>) {
        if let Some(w) = self.accounts.get_mut(account) {
            if now - w.started < self.window {
                w.count = w.count.saturating_sub(1);
            }
        }
    }

    pub fn used(&self, account: &str, now: DateTime<Utc>) -> u32 {
        match self.accounts.get(account) {
            Some(w) if now - w.started < self.window => w.count,
            _ => 0,
        }
    }
}
