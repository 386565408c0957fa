//! Keep-alive and statistics housekeeping countdowns (§4.5), grounded on
//! `original_source/linkfd.c`'s `sig_alarm`, which rearms each timer to
//! whichever of the two countdowns is shorter and fires the one(s) that
//! reached zero. Rendered here as a pollable deadline instead of a
//! signal, per REDESIGN FLAGS.

use std::time::Duration;

/// Which housekeeping actions are due after [`HousekeepingTimer::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickResult {
    /// The keep-alive countdown reached zero: send an echo-request (or,
    /// if the link engine's own idle-probe counter is already at its
    /// configured maximum, declare a network timeout).
    pub keepalive_due: bool,
    /// The statistics countdown reached zero: flush a stats row.
    pub stats_due: bool,
}

/// Two independent countdowns sharing a single next-wakeup deadline, so
/// the link engine only needs one `tokio::time::sleep` in its
/// `select!` rather than a timer per concern.
pub struct HousekeepingTimer {
    keepalive_interval: Duration,
    stat_interval: Duration,
    ka_remaining: Duration,
    stat_remaining: Duration,
}

impl HousekeepingTimer {
    /// Start both countdowns at their full interval.
    pub fn new(keepalive_interval: Duration, stat_interval: Duration) -> Self {
        Self {
            keepalive_interval,
            stat_interval,
            ka_remaining: keepalive_interval,
            stat_remaining: stat_interval,
        }
    }

    /// How long until the nearer of the two countdowns elapses. The link
    /// engine sleeps for exactly this long before calling [`Self::tick`].
    pub fn next_deadline(&self) -> Duration {
        self.ka_remaining.min(self.stat_remaining)
    }

    /// Advance both countdowns by [`Self::next_deadline`]'s duration (the
    /// amount just slept), rearming whichever one(s) reached zero back to
    /// their full interval.
    pub fn tick(&mut self) -> TickResult {
        let elapsed = self.next_deadline();
        let mut result = TickResult::default();

        self.ka_remaining = self.ka_remaining.saturating_sub(elapsed);
        if self.ka_remaining == Duration::ZERO {
            result.keepalive_due = true;
            self.ka_remaining = self.keepalive_interval;
        }

        self.stat_remaining = self.stat_remaining.saturating_sub(elapsed);
        if self.stat_remaining == Duration::ZERO {
            result.stats_due = true;
            self.stat_remaining = self.stat_interval;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorter_interval_fires_first() {
        let mut timer = HousekeepingTimer::new(Duration::from_secs(10), Duration::from_secs(30));
        assert_eq!(timer.next_deadline(), Duration::from_secs(10));
        let result = timer.tick();
        assert!(result.keepalive_due);
        assert!(!result.stats_due);
        assert_eq!(timer.ka_remaining, Duration::from_secs(10));
        assert_eq!(timer.stat_remaining, Duration::from_secs(20));
    }

    #[test]
    fn both_fire_together_when_equal() {
        let mut timer = HousekeepingTimer::new(Duration::from_secs(5), Duration::from_secs(5));
        let result = timer.tick();
        assert!(result.keepalive_due);
        assert!(result.stats_due);
    }

    #[test]
    fn countdowns_rearm_after_firing() {
        let mut timer = HousekeepingTimer::new(Duration::from_secs(1), Duration::from_secs(3));
        timer.tick(); // ka fires, rearms to 1s; stat now at 2s
        assert_eq!(timer.next_deadline(), Duration::from_secs(1));
        let second = timer.tick(); // ka fires again; stat now at 1s
        assert!(second.keepalive_due);
        assert!(!second.stats_due);
        let third = timer.tick(); // ka fires a third time, stat reaches 0 too
        assert!(third.keepalive_due);
        assert!(third.stats_due);
    }
}
