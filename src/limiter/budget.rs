//! Per-identity call budget over rolling windows.

use std::time::Duration;

use tokio::time::Instant;

/// Caps for the two rolling windows tracked per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Maximum calls per rolling minute.
    pub per_minute: u32,

    /// Maximum calls per rolling hour.
    pub per_hour: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_hour: 200,
        }
    }
}

/// A single fixed window that rolls forward with wall-clock time.
#[derive(Debug, Clone)]
struct WindowCounter {
    cap: u32,
    len: Duration,
    started: Instant,
    used: u32,
}

impl WindowCounter {
    fn new(cap: u32, len: Duration, now: Instant) -> Self {
        Self {
            cap,
            len,
            started: now,
            used: 0,
        }
    }

    /// Rolls the window start forward past any fully elapsed periods.
    ///
    /// The start only ever moves forward, in whole window lengths, so the
    /// boundary stays aligned with the first call that opened the window.
    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.len {
            let periods = elapsed.as_nanos() / self.len.as_nanos().max(1);
            #[allow(clippy::cast_possible_truncation)]
            let advance = self.len * (periods as u32);
            self.started += advance;
            self.used = 0;
        }
    }

    fn has_capacity(&self) -> bool {
        self.used < self.cap
    }

    fn consume(&mut self) {
        self.used += 1;
    }

    /// Time until this window frees capacity (zero if it already has some).
    fn retry_after(&self, now: Instant) -> Duration {
        if self.has_capacity() {
            Duration::ZERO
        } else {
            (self.started + self.len).saturating_duration_since(now)
        }
    }

    /// Fraction of this window's cap already consumed.
    fn utilization(&self) -> f64 {
        if self.cap == 0 {
            1.0
        } else {
            f64::from(self.used) / f64::from(self.cap)
        }
    }
}

/// Per-identity counters for the per-minute and per-hour windows, plus an
/// optional server-imposed penalty hold.
#[derive(Debug, Clone)]
pub(crate) struct CallBudget {
    minute: WindowCounter,
    hour: WindowCounter,
    penalty_until: Option<Instant>,
}

impl CallBudget {
    pub(crate) fn new(limits: RateLimits, now: Instant) -> Self {
        Self {
            minute: WindowCounter::new(limits.per_minute, Duration::from_secs(60), now),
            hour: WindowCounter::new(limits.per_hour, Duration::from_secs(3600), now),
            penalty_until: None,
        }
    }

    fn roll(&mut self, now: Instant) {
        self.minute.roll(now);
        self.hour.roll(now);
        if let Some(until) = self.penalty_until
            && until <= now
        {
            self.penalty_until = None;
        }
    }

    /// Admits and counts one call, or reports how long until one would fit.
    ///
    /// Check-and-increment happens in one step; the counters never exceed
    /// their caps.
    pub(crate) fn try_consume(&mut self, now: Instant) -> Result<(), Duration> {
        self.roll(now);

        let wait = self.time_until_capacity(now);
        if !wait.is_zero() {
            return Err(wait);
        }

        self.minute.consume();
        self.hour.consume();
        Ok(())
    }

    /// Whether a call would currently be admitted, without consuming.
    pub(crate) fn would_admit(&mut self, now: Instant) -> bool {
        self.roll(now);
        self.time_until_capacity(now).is_zero()
    }

    /// Time until every constraint (both windows and any penalty) clears.
    pub(crate) fn time_until_capacity(&self, now: Instant) -> Duration {
        let penalty = self
            .penalty_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));

        penalty
            .max(self.minute.retry_after(now))
            .max(self.hour.retry_after(now))
    }

    /// Current utilization: the fuller of the two windows.
    pub(crate) fn utilization(&mut self, now: Instant) -> f64 {
        self.roll(now);
        self.minute.utilization().max(self.hour.utilization())
    }

    /// Holds this budget closed until the server-imposed wait elapses.
    ///
    /// An existing longer penalty is kept.
    pub(crate) fn penalize(&mut self, now: Instant, wait: Duration) {
        let until = now + wait;
        self.penalty_until = Some(self.penalty_until.map_or(until, |cur| cur.max(until)));
    }

    /// Clears all counters and penalties, allowing immediate calls.
    pub(crate) fn reset(&mut self, now: Instant) {
        self.minute = WindowCounter::new(self.minute.cap, self.minute.len, now);
        self.hour = WindowCounter::new(self.hour.cap, self.hour.len, now);
        self.penalty_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(per_minute: u32, per_hour: u32) -> CallBudget {
        CallBudget::new(
            RateLimits {
                per_minute,
                per_hour,
            },
            Instant::now(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_up_to_cap() {
        let mut b = budget(2, 100);
        let now = Instant::now();

        assert!(b.try_consume(now).is_ok());
        assert!(b.try_consume(now).is_ok());

        let wait = b.try_consume(now).unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rolls_forward() {
        let mut b = budget(1, 100);
        let start = Instant::now();

        assert!(b.try_consume(start).is_ok());
        assert!(b.try_consume(start).is_err());

        // One full minute later the window has rolled.
        let later = start + Duration::from_secs(61);
        assert!(b.try_consume(later).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hour_window_blocks_after_minute_frees() {
        let mut b = budget(10, 1);
        let start = Instant::now();

        assert!(b.try_consume(start).is_ok());

        let later = start + Duration::from_secs(120);
        let wait = b.try_consume(later).unwrap_err();
        // Still blocked by the hour window.
        assert!(wait > Duration::from_secs(60 * 50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalty_blocks_even_with_capacity() {
        let mut b = budget(10, 100);
        let now = Instant::now();

        b.penalize(now, Duration::from_secs(30));
        let wait = b.try_consume(now).unwrap_err();
        assert_eq!(wait, Duration::from_secs(30));

        assert!(b.try_consume(now + Duration::from_secs(31)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_penalty_wins() {
        let mut b = budget(10, 100);
        let now = Instant::now();

        b.penalize(now, Duration::from_secs(60));
        b.penalize(now, Duration::from_secs(10));
        assert_eq!(b.time_until_capacity(now), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_utilization_tracks_fuller_window() {
        let mut b = budget(4, 100);
        let now = Instant::now();

        assert!((b.utilization(now) - 0.0).abs() < f64::EPSILON);
        assert!(b.try_consume(now).is_ok());
        assert!((b.utilization(now) - 0.25).abs() < f64::EPSILON);
    }
}
