//! Waiting for a volume's raw device to become usable.

use crate::{LifecycleConfig, Result, VolumeError};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Checks whether a raw device exists and can be opened for writing.
///
/// Implementations must not hold the device open after returning.
pub trait DeviceProbe: Send + Sync {
    fn is_ready(&self, device: &Path) -> bool;
}

/// Smallest first delay; a zero delay would never grow.
pub const MIN_INITIAL_DELAY: Duration = Duration::from_millis(1);

/// Smallest delay cap, so a misconfigured cap cannot turn the wait into a
/// tight polling loop.
pub const MIN_MAX_DELAY: Duration = Duration::from_millis(100);

/// Exponential delays: `initial`, doubling each step, capped at `max`.
///
/// The cap is raised to at least `initial` and [`MIN_MAX_DELAY`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_INITIAL_DELAY);
        Self {
            next: initial,
            max: max.max(initial).max(MIN_MAX_DELAY),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    initial_delay: Duration,
    max_delay: Duration,
    budget: Duration,
}

impl ReadinessWaiter {
    pub fn new(initial_delay: Duration, max_delay: Duration, budget: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            budget,
        }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(
            config.readiness_initial_delay(),
            config.readiness_max_delay(),
            config.readiness_budget(),
        )
    }

    /// Poll `probe` until the device is ready or the budget runs out.
    ///
    /// A sleep is shortened so that it never runs past the budget, and one
    /// final probe is made at the deadline. Dropping the returned future
    /// cancels the wait.
    pub async fn wait(&self, probe: &dyn DeviceProbe, device: &Path) -> Result<()> {
        let started = Instant::now();
        let mut backoff = Backoff::new(self.initial_delay, self.max_delay);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if probe.is_ready(device) {
                info!(
                    device = %device.display(),
                    attempts,
                    elapsed = ?started.elapsed(),
                    "Device ready"
                );
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= self.budget {
                return Err(VolumeError::Timeout {
                    what: format!("device {} to become writable", device.display()),
                    after: elapsed,
                });
            }

            let delay = backoff
                .next()
                .unwrap_or(MIN_MAX_DELAY)
                .min(self.budget - elapsed);
            debug!(device = %device.display(), attempts, ?delay, "Device not ready, backing off");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedProbe;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let delays: Vec<_> = Backoff::new(Duration::from_secs(1), Duration::from_secs(45))
            .take(8)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 45, 45]);
    }

    #[test]
    fn test_backoff_monotonic_and_bounded() {
        let max = Duration::from_millis(700);
        let delays: Vec<_> = Backoff::new(Duration::from_millis(3), max).take(20).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(delays.iter().all(|d| *d <= max));
    }

    #[test]
    fn test_backoff_cap_never_below_initial() {
        let delays: Vec<_> = Backoff::new(Duration::from_secs(10), Duration::from_secs(2))
            .take(3)
            .collect();
        assert_eq!(delays, vec![Duration::from_secs(10); 3]);
    }

    #[test]
    fn test_backoff_zero_inputs_still_grow() {
        let delays: Vec<_> = Backoff::new(Duration::ZERO, Duration::ZERO).take(10).collect();
        assert_eq!(delays[0], MIN_INITIAL_DELAY);
        assert_eq!(*delays.last().unwrap(), MIN_MAX_DELAY);
        assert!(delays.iter().all(|d| !d.is_zero()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cap_does_not_spin() {
        let probe = ScriptedProbe::never_ready();
        let waiter = ReadinessWaiter::new(Duration::from_millis(1), Duration::ZERO, Duration::from_secs(1));
        assert!(waiter.wait(&probe, Path::new("/dev/x")).await.unwrap_err().is_timeout());

        // 1+2+..+64 ms, then 100 ms steps up to the 1 s budget
        assert!(probe.probes() <= 20, "{} probes", probe.probes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_immediately() {
        let probe = ScriptedProbe::ready_after(0);
        let waiter = ReadinessWaiter::new(Duration::from_secs(1), Duration::from_secs(45), Duration::from_secs(45));
        waiter.wait(&probe, Path::new("/dev/x")).await.unwrap();
        assert_eq!(probe.probes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_backoff() {
        let probe = ScriptedProbe::ready_after(3);
        let waiter = ReadinessWaiter::new(Duration::from_secs(1), Duration::from_secs(45), Duration::from_secs(45));
        let started = Instant::now();
        waiter.wait(&probe, Path::new("/dev/x")).await.unwrap();

        // 1s + 2s + 4s of backoff before the fourth probe
        assert_eq!(probe.probes(), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_millis(7100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_at_budget() {
        let probe = ScriptedProbe::never_ready();
        let waiter = ReadinessWaiter::new(Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(3));
        let started = Instant::now();
        let err = waiter.wait(&probe, Path::new("/dev/x")).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() <= Duration::from_secs(4));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_clamped_to_budget() {
        let probe = ScriptedProbe::never_ready();
        let waiter = ReadinessWaiter::new(Duration::from_secs(30), Duration::from_secs(45), Duration::from_secs(10));
        let started = Instant::now();
        assert!(waiter.wait(&probe, Path::new("/dev/x")).await.is_err());

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_millis(10100));
        assert!(probe.probes() <= 3);
    }
}
