//! Repeated-cycle stress testing.

use {
    crate::{
        cycle::{CycleConfig, OutcomeStatus, TestOutcome, run_single_cycle, sleep_cancellable},
        error::Result,
        is_interrupted_requested,
        link::Link,
    },
    log::{debug, info},
    std::time::Duration,
};

/// Stress run parameters.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Per-cycle request and timing.
    pub cycle: CycleConfig,
    /// Number of cycles to run.
    pub cycles: u32,
    /// Pause between two cycles.
    pub interval: Duration,
    /// Stop at the first cycle that is not a success.
    pub stop_on_error: bool,
}

impl StressConfig {
    /// Run `cycles` back to back, continuing past errors.
    pub fn new(cycle: CycleConfig, cycles: u32) -> Self {
        Self {
            cycle,
            cycles,
            interval: Duration::ZERO,
            stop_on_error: false,
        }
    }

    /// Set the pause between cycles.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stop at the first non-success.
    #[must_use]
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StressStats {
    /// Cycles completed.
    pub total: u32,
    /// Successful cycles.
    pub success: u32,
    /// Cycles ending with a device error code.
    pub failure: u32,
    /// Cycles ending without a completion frame.
    pub timeout: u32,
}

impl StressStats {
    /// Count one finished cycle. Cancelled cycles are not counted.
    pub fn record(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Success => self.success += 1,
            OutcomeStatus::Failure => self.failure += 1,
            OutcomeStatus::Timeout => self.timeout += 1,
            OutcomeStatus::Cancelled => return,
        }
        self.total += 1;
    }

    /// Share of successful cycles, 0 for an empty run.
    pub fn stability_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.success) * 100.0 / f64::from(self.total)
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StressReport {
    /// One record per executed cycle.
    pub outcomes: Vec<TestOutcome>,
    /// Final counters.
    pub stats: StressStats,
    /// Stopped by `stop_on_error`.
    pub stopped_early: bool,
    /// Stopped by the caller.
    pub cancelled: bool,
}

/// Run the configured number of cycles over `link`.
///
/// `on_progress` is called after every cycle with the running counters. A
/// transport fault ends the run with an error.
pub fn run_stress_test<L, F>(
    link: &mut L,
    config: &StressConfig,
    cancel: &dyn Fn() -> bool,
    mut on_progress: F,
) -> Result<StressReport>
where
    L: Link + ?Sized,
    F: FnMut(&TestOutcome, &StressStats),
{
    let mut report = StressReport::default();
    let stop = || cancel() || is_interrupted_requested();

    info!(
        "Stress test: {} x {} (interval {} ms)",
        config.cycles,
        config.cycle.command.command(),
        config.interval.as_millis()
    );

    for cycle in 1..=config.cycles {
        if stop() {
            report.cancelled = true;
            break;
        }

        let outcome = run_single_cycle(link, &config.cycle, cycle, cancel)?;
        let status = outcome.status;
        report.stats.record(status);
        on_progress(&outcome, &report.stats);
        report.outcomes.push(outcome);

        if status == OutcomeStatus::Cancelled {
            report.cancelled = true;
            break;
        }
        if config.stop_on_error && status != OutcomeStatus::Success {
            info!("Stopping after cycle {cycle}: {status}");
            report.stopped_early = true;
            break;
        }

        if cycle < config.cycles
            && !config.interval.is_zero()
            && !sleep_cancellable(config.interval, config.cycle.poll_interval, &stop)
        {
            report.cancelled = true;
            break;
        }
    }

    debug!(
        "Stress test done: {}/{} ok ({:.1}%)",
        report.stats.success,
        report.stats.total,
        report.stats.stability_percent()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cycle::CycleCommand,
        protocol::ErrorCode,
        testing::{ScriptedLink, version_reply},
    };
    use std::cell::Cell;

    fn config(cycles: u32) -> StressConfig {
        let cycle = CycleConfig::new(1, CycleCommand::ReadVersion)
            .with_timeout(Duration::from_millis(20))
            .with_response_margin(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(1));
        StressConfig::new(cycle, cycles)
    }

    /// Answers every request except the `skip`-th (1-based).
    fn link_skipping(skip: usize) -> ScriptedLink {
        let mut count = 0;
        ScriptedLink::new(move |_| {
            count += 1;
            if count == skip {
                Vec::new()
            } else {
                vec![version_reply(1, "1.0.0", ErrorCode::OK)]
            }
        })
    }

    #[test]
    fn test_one_timeout_runs_all_cycles() {
        let mut link = link_skipping(3);
        let mut progress = Vec::new();

        let report = run_stress_test(&mut link, &config(5), &|| false, |outcome, stats| {
            progress.push((outcome.cycle, stats.total));
        })
        .unwrap();

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.stats.total, 5);
        assert_eq!(report.stats.success, 4);
        assert_eq!(report.stats.timeout, 1);
        assert_eq!(report.outcomes[2].status, OutcomeStatus::Timeout);
        assert!((report.stats.stability_percent() - 80.0).abs() < f64::EPSILON);
        assert!(!report.stopped_early);
        assert_eq!(progress, vec![(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
    }

    #[test]
    fn test_stop_on_error_stops_at_first_failure() {
        let mut link = link_skipping(3);
        let config = config(5).with_stop_on_error(true);

        let report = run_stress_test(&mut link, &config, &|| false, |_, _| {}).unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert!(report.stopped_early);
        assert_eq!(link.sent.len(), 3);
    }

    #[test]
    fn test_cancel_between_cycles() {
        let mut link = link_skipping(0);
        let done = Cell::new(0);
        let config = config(10).with_interval(Duration::from_millis(5));

        let report = run_stress_test(&mut link, &config, &|| done.get() >= 2, |_, _| {
            done.set(done.get() + 1);
        })
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.stats.success, 2);
    }

    #[test]
    fn test_empty_stats_are_zero_percent() {
        assert!(StressStats::default().stability_percent().abs() < f64::EPSILON);
    }

    #[test]
    fn test_cancelled_cycle_not_counted() {
        let mut stats = StressStats::default();
        stats.record(OutcomeStatus::Cancelled);
        stats.record(OutcomeStatus::Failure);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.failure, 1);
    }
}
