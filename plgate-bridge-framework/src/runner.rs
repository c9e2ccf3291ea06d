//! Fixed-period run loop with cooperative shutdown.
//!
//! The loop calls a [`Cyclic`] worker once per period. Processing time is
//! measured and subtracted from the sleep; a tick that overran the period is
//! followed immediately by the next one, with no catch-up of missed ticks.
//! Shutdown is a flag checked between ticks, so an in-flight bus transaction
//! always runs to completion (or to its own timeout).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shortest permitted loop period.
pub const MIN_LOOP_INTERVAL_MS: u64 = 50;
/// Longest permitted loop period.
pub const MAX_LOOP_INTERVAL_MS: u64 = 2000;

/// Clamp a configured loop period to the permitted range.
pub fn clamp_loop_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(MIN_LOOP_INTERVAL_MS, MAX_LOOP_INTERVAL_MS))
}

/// Process-exit request, observed between ticks.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Spawn a task that sets the flag on SIGINT, or SIGTERM on unix.
    pub fn install_signal_handlers(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            let signal = wait_for_signal().await;
            tracing::info!(signal, "Received shutdown signal");
            flag.request();
        });
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
    "SIGINT"
}

/// Work performed once per loop period.
#[allow(async_fn_in_trait)]
pub trait Cyclic {
    /// Run one tick; return `true` if any work was done.
    async fn tick(&mut self) -> bool;
}

/// Min/max processing time over ticks that did work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub busy_ticks: u64,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
}

impl TickStats {
    pub fn record(&mut self, elapsed: Duration) {
        self.busy_ticks += 1;
        self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |m| m.max(elapsed)));
    }
}

/// Time left to sleep in a period after `elapsed` of processing.
pub fn remaining_sleep(period: Duration, elapsed: Duration) -> Option<Duration> {
    period.checked_sub(elapsed).filter(|d| !d.is_zero())
}

/// Drives a [`Cyclic`] worker at a fixed period until shutdown is requested.
#[derive(Debug)]
pub struct LoopRunner {
    period: Duration,
    shutdown: ShutdownFlag,
    stats: TickStats,
}

impl LoopRunner {
    /// Create a runner; `interval_ms` is clamped to the permitted range.
    pub fn new(interval_ms: u64, shutdown: ShutdownFlag) -> Self {
        let period = clamp_loop_interval(interval_ms);
        if period.as_millis() != u128::from(interval_ms) {
            tracing::warn!(
                configured_ms = interval_ms,
                used_ms = period.as_millis() as u64,
                "Main loop interval out of range, clamped"
            );
        }
        tracing::info!(interval_ms = period.as_millis() as u64, "Main loop interval");
        Self {
            period,
            shutdown,
            stats: TickStats::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Run until the shutdown flag is set.
    pub async fn run<W: Cyclic>(&mut self, worker: &mut W) -> TickStats {
        while !self.shutdown.is_requested() {
            let start = Instant::now();
            let busy = worker.tick().await;
            let elapsed = start.elapsed();

            if busy {
                tracing::debug!(elapsed_us = elapsed.as_micros() as u64, "Processing tick");
                self.stats.record(elapsed);
            }

            if let Some(sleep) = remaining_sleep(self.period, elapsed) {
                tokio::time::sleep(sleep).await;
            }
        }

        if let (Some(min), Some(max)) = (self.stats.min, self.stats.max) {
            tracing::info!(
                min_us = min.as_micros() as u64,
                max_us = max.as_micros() as u64,
                ticks = self.stats.busy_ticks,
                "Processing time"
            );
        }
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_loop_interval() {
        assert_eq!(clamp_loop_interval(10), Duration::from_millis(50));
        assert_eq!(clamp_loop_interval(5000), Duration::from_millis(2000));
        assert_eq!(clamp_loop_interval(250), Duration::from_millis(250));
        assert_eq!(clamp_loop_interval(50), Duration::from_millis(50));
        assert_eq!(clamp_loop_interval(2000), Duration::from_millis(2000));
    }

    #[test]
    fn test_remaining_sleep() {
        let period = Duration::from_millis(100);
        assert_eq!(
            remaining_sleep(period, Duration::from_millis(30)),
            Some(Duration::from_millis(70))
        );
        assert_eq!(remaining_sleep(period, Duration::from_millis(100)), None);
        assert_eq!(remaining_sleep(period, Duration::from_millis(250)), None);
    }

    #[test]
    fn test_tick_stats() {
        let mut stats = TickStats::default();
        stats.record(Duration::from_micros(500));
        stats.record(Duration::from_micros(100));
        stats.record(Duration::from_micros(900));
        assert_eq!(stats.busy_ticks, 3);
        assert_eq!(stats.min, Some(Duration::from_micros(100)));
        assert_eq!(stats.max, Some(Duration::from_micros(900)));
    }

    struct Counter {
        ticks: u32,
        stop_after: u32,
        shutdown: ShutdownFlag,
    }

    impl Cyclic for Counter {
        async fn tick(&mut self) -> bool {
            self.ticks += 1;
            if self.ticks >= self.stop_after {
                self.shutdown.request();
            }
            self.ticks % 2 == 0
        }
    }

    #[tokio::test]
    async fn test_runner_stops_between_ticks() {
        let shutdown = ShutdownFlag::new();
        let mut runner = LoopRunner::new(10, shutdown.clone());
        assert_eq!(runner.period(), Duration::from_millis(50));

        let mut worker = Counter {
            ticks: 0,
            stop_after: 3,
            shutdown,
        };
        let stats = runner.run(&mut worker).await;

        assert_eq!(worker.ticks, 3);
        assert_eq!(stats.busy_ticks, 1);
    }

    #[tokio::test]
    async fn test_runner_skips_when_already_stopped() {
        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let mut runner = LoopRunner::new(100, shutdown.clone());
        let mut worker = Counter {
            ticks: 0,
            stop_after: 10,
            shutdown,
        };
        runner.run(&mut worker).await;
        assert_eq!(worker.ticks, 0);
    }
}
