use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    SignalScan,
    EquityCheck,
    TrailingUpdate,
    BlockSeal,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::SignalScan => write!(f, "signal_scan"),
            Task::EquityCheck => write!(f, "equity_check"),
            Task::TrailingUpdate => write!(f, "trailing_update"),
            Task::BlockSeal => write!(f, "block_seal"),
        }
    }
}

struct Periodic {
    task: Task,
    interval: Duration,
    last_run: Option<DateTime<Utc>>,
}

/// Interval bookkeeping for the bot's periodic jobs. It never sleeps or
/// spawns; the caller asks which tasks are due at a given instant.
pub struct Scheduler {
    tasks: Vec<Periodic>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn every(mut self, task: Task, interval: Duration) -> Self {
        self.tasks.retain(|p| p.task != task);
        self.tasks.push(Periodic {
            task,
            interval,
            last_run: None,
        });
        self
    }

    /// Tasks due at `now`, in registration order. Returned tasks are marked as run.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let mut due = Vec::new();
        for p in &mut self.tasks {
            let ready = match p.last_run {
                None => true,
                Some(last) => now - last >= p.interval,
            };
            if ready {
                p.last_run = Some(now);
                due.push(p.task);
            }
        }
        due
    }

    pub fn interval(&self, task: Task) -> Option<Duration> {
        self.tasks.iter().find(|p| p.task == task).map(|p| p.interval)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::base_time;

    #[test]
    fn tasks_fire_on_first_tick_then_by_interval() {
        let t0 = base_time();
        let mut s = Scheduler::new()
            .every(Task::SignalScan, Duration::seconds(30))
            .every(Task::BlockSeal, Duration::seconds(60));

        assert_eq!(s.due(t0), vec![Task::SignalScan, Task::BlockSeal]);
        assert!(s.due(t0 + Duration::seconds(10)).is_empty());
        assert_eq!(s.due(t0 + Duration::seconds(30)), vec![Task::SignalScan]);
        assert_eq!(
            s.due(t0 + Duration::seconds(60)),
            vec![Task::SignalScan, Task::BlockSeal]
        );
    }

    #[test]
    fn re_registering_replaces_interval() {
        let s = Scheduler::new()
            .every(Task::EquityCheck, Duration::seconds(5))
            .every(Task::EquityCheck, Duration::seconds(15));
        assert_eq!(s.interval(Task::EquityCheck), Some(Duration::seconds(15)));
    }
}
