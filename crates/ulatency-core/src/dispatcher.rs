use std::{sync::Arc, time::Duration, time::Instant};

use nix::unistd::Pid;
use strum::Display;
use thiserror::Error;

use crate::{
    cache::CacheLookup,
    filter::{ActionOutcome, Filter, FilterError, FilterName, MatchOutcome},
    registry::FilterRegistry,
    snapshot::ProcessSnapshot,
    time::Timestamp,
};

/// Calls slower than this are reported by default.
const DEFAULT_SLOW_CALL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ScanStage {
    Match,
    Action,
}

/// A match or action invocation which failed. The failure only affects the
/// (filter, process) pair for the current tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("filter {filter} {stage} failed on process {pid}")]
pub struct ScanFailure {
    pub filter: FilterName,
    pub pid: Pid,
    pub stage: ScanStage,
    #[source]
    pub error: FilterError,
}

/// An invocation which took longer than the slow call threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowCall {
    pub filter: FilterName,
    pub pid: Pid,
    pub stage: ScanStage,
    pub elapsed: Duration,
}

/// Summary of one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub processes: usize,
    pub cache_hits: usize,
    pub matches: usize,
    pub actions: usize,
    pub stopped: usize,
    pub failures: Vec<ScanFailure>,
    pub slow_calls: Vec<SlowCall>,
}

impl ScanReport {
    fn merge(&mut self, other: ScanReport) {
        self.processes += other.processes;
        self.cache_hits += other.cache_hits;
        self.matches += other.matches;
        self.actions += other.actions;
        self.stopped += other.stopped;
        self.failures.extend(other.failures);
        self.slow_calls.extend(other.slow_calls);
    }
}

/// Runs the registered filters against process snapshots.
///
/// Scans take `&mut self`, so two ticks driven by the same dispatcher can never
/// overlap: every cache write of a tick is done before the next one starts.
pub struct ScanDispatcher {
    registry: FilterRegistry,
    slow_call: Duration,
}

impl ScanDispatcher {
    pub fn new(registry: FilterRegistry) -> Self {
        Self {
            registry,
            slow_call: DEFAULT_SLOW_CALL,
        }
    }

    pub fn with_slow_call_threshold(mut self, slow_call: Duration) -> Self {
        self.slow_call = slow_call;
        self
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Run one tick over `processes`.
    ///
    /// The active filters are captured once before any of them runs: filters
    /// registered or removed by an action only take part from the next tick.
    pub fn scan(&mut self, processes: &[ProcessSnapshot], now: Timestamp) -> ScanReport {
        let filters = self.registry.active_filters();
        let mut report = ScanReport::default();
        for process in processes {
            report.merge(self.run_for_process(&filters, process, now));
        }
        for filter in &filters {
            let purged = filter.cache().purge_expired(now);
            if purged > 0 {
                log::trace!("purged {purged} expired entries from {}", filter.name());
            }
        }
        report
    }

    /// Apply the cache check, match and action protocol of every filter to
    /// a single process.
    pub fn run_for_process(
        &self,
        filters: &[Arc<Filter>],
        process: &ProcessSnapshot,
        now: Timestamp,
    ) -> ScanReport {
        let pid = process.pid();
        let mut report = ScanReport {
            processes: 1,
            ..Default::default()
        };

        for filter in filters {
            match filter.cache().lookup(pid, now) {
                CacheLookup::Miss => {}
                CacheLookup::SkipUntil(_) | CacheLookup::SkipForever => {
                    report.cache_hits += 1;
                    continue;
                }
            }

            let outcome = self.timed(filter, process, ScanStage::Match, &mut report, || {
                filter.check(process)
            });
            match outcome {
                Ok(MatchOutcome::NoMatch) => continue,
                Ok(MatchOutcome::StopAll) => {
                    log::trace!("filter {} stopped the scan of {pid}", filter.name());
                    report.stopped += 1;
                    break;
                }
                Ok(MatchOutcome::Match) => report.matches += 1,
                Err(error) => {
                    report_failure(&mut report, filter, pid, ScanStage::Match, error);
                    continue;
                }
            }

            let outcome = self.timed(filter, process, ScanStage::Action, &mut report, || {
                filter.action(process)
            });
            report.actions += 1;
            match outcome {
                Ok(ActionOutcome::NoCache) => {}
                Ok(outcome) => {
                    let decision = filter.cache().record(pid, now, outcome);
                    log::trace!("filter {} cached {decision:?} for {pid}", filter.name());
                }
                Err(error) => report_failure(&mut report, filter, pid, ScanStage::Action, error),
            }
        }

        report
    }

    fn timed<T, F>(
        &self,
        filter: &Filter,
        process: &ProcessSnapshot,
        stage: ScanStage,
        report: &mut ScanReport,
        call: F,
    ) -> T
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let result = call();
        let elapsed = start.elapsed();
        if elapsed >= self.slow_call {
            log::warn!(
                "filter {} {stage} took {}ms on process {}",
                filter.name(),
                elapsed.as_millis(),
                process.pid()
            );
            report.slow_calls.push(SlowCall {
                filter: filter.name().clone(),
                pid: process.pid(),
                stage,
                elapsed,
            });
        }
        result
    }
}

fn report_failure(
    report: &mut ScanReport,
    filter: &Filter,
    pid: Pid,
    stage: ScanStage,
    error: FilterError,
) {
    let failure = ScanFailure {
        filter: filter.name().clone(),
        pid,
        stage,
        error,
    };
    log::warn!("{failure}: {}", failure.error);
    report.failures.push(failure);
}
