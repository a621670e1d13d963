use ulatency_core::{
    FilterRegistry, ProcessLifecycle, ProcessSource, ProcfsError, ScanDispatcher, ScanReport,
    Timestamp,
};

use super::config::GeneralConfig;

/// One scan tick: snapshot the processes, forget the exited ones, run the
/// filters.
pub struct Scanner<S> {
    source: S,
    lifecycle: ProcessLifecycle,
    dispatcher: ScanDispatcher,
    ticks: u64,
}

impl<S: ProcessSource> Scanner<S> {
    pub fn new(source: S, registry: FilterRegistry, config: &GeneralConfig) -> Self {
        Self {
            source,
            lifecycle: ProcessLifecycle::new(registry.clone()),
            dispatcher: ScanDispatcher::new(registry).with_slow_call_threshold(config.slow_call),
            ticks: 0,
        }
    }

    pub fn registry(&self) -> &FilterRegistry {
        self.dispatcher.registry()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick(&mut self, now: Timestamp) -> Result<ScanReport, ProcfsError> {
        let processes = self.source.snapshot()?;
        let exited = self.lifecycle.observe(&processes);
        let report = self.dispatcher.scan(&processes, now);
        self.ticks += 1;

        log::debug!(
            "tick {} at {now}: {} processes, {} exited, {} cached, {} matched, {} actions, \
             {} failures",
            self.ticks,
            report.processes,
            exited.len(),
            report.cache_hits,
            report.matches,
            report.actions,
            report.failures.len(),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use ulatency_core::{ActionOutcome, Filter, MatchOutcome, Pid, ProcessSnapshot};

    use super::*;

    /// Replays a list of process tables, one per tick.
    struct Replay(Vec<Vec<ProcessSnapshot>>);

    impl ProcessSource for Replay {
        fn snapshot(&mut self) -> Result<Vec<ProcessSnapshot>, ProcfsError> {
            Ok(if self.0.is_empty() {
                Vec::new()
            } else {
                self.0.remove(0)
            })
        }
    }

    /// Live process table that filters can change while a tick runs.
    #[derive(Clone, Default)]
    struct Table(Arc<Mutex<Vec<ProcessSnapshot>>>);

    impl ProcessSource for Table {
        fn snapshot(&mut self) -> Result<Vec<ProcessSnapshot>, ProcfsError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn process(pid: i32, start_time: u64) -> ProcessSnapshot {
        ProcessSnapshot::builder(Pid::from_raw(pid))
            .basename("stress")
            .start_time(start_time)
            .build()
    }

    fn config() -> GeneralConfig {
        GeneralConfig {
            interval: Duration::from_secs(5),
            slow_call: Duration::from_secs(1),
        }
    }

    #[test]
    fn recycled_pid_is_evaluated_again() {
        let actions = Arc::new(AtomicUsize::new(0));
        let counter = actions.clone();
        let registry = FilterRegistry::new();
        registry
            .register(Filter::native(
                "stress",
                (),
                |_, _| Ok(MatchOutcome::Match),
                move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ActionOutcome::SkipForever)
                },
            ))
            .unwrap();

        let source = Replay(vec![
            vec![process(100, 1)],
            vec![process(100, 1)],
            // pid 100 exited and was handed to a new process
            vec![process(100, 2)],
        ]);
        let mut scanner = Scanner::new(source, registry, &config());
        let t0 = Timestamp::from_secs(0);

        assert_eq!(scanner.tick(t0).unwrap().actions, 1);
        assert_eq!(scanner.tick(t0 + Duration::from_secs(5)).unwrap().cache_hits, 1);
        assert_eq!(scanner.tick(t0 + Duration::from_secs(10)).unwrap().actions, 1);
        assert_eq!(actions.load(Ordering::SeqCst), 2);
        assert_eq!(scanner.ticks(), 3);
    }

    #[test]
    fn tick_sees_the_table_it_captured() {
        let table = Table::default();
        table.0.lock().unwrap().extend([process(1, 1), process(2, 1)]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (live, log) = (table.clone(), seen.clone());
        let registry = FilterRegistry::new();
        registry
            .register(Filter::native(
                "spawner",
                (),
                |_, _| Ok(MatchOutcome::Match),
                move |process, _| {
                    log.lock().unwrap().push(process.pid());
                    // the others exit and a child starts while the tick runs
                    let mut table = live.0.lock().unwrap();
                    table.retain(|p| p.pid() == process.pid());
                    table.push(self::process(100 + process.pid().as_raw(), 1));
                    Ok(ActionOutcome::SkipForever)
                },
            ))
            .unwrap();

        let mut scanner = Scanner::new(table.clone(), registry, &config());
        let report = scanner.tick(Timestamp::from_secs(0)).unwrap();
        assert_eq!(report.processes, 2);
        assert_eq!(report.actions, 2);
        assert_eq!(*seen.lock().unwrap(), vec![Pid::from_raw(1), Pid::from_raw(2)]);

        // the changes only show up in the next tick
        assert_eq!(table.0.lock().unwrap().len(), 1);
        let report = scanner.tick(Timestamp::from_secs(5)).unwrap();
        assert_eq!(report.processes, 1);
        assert_eq!(seen.lock().unwrap().last(), Some(&Pid::from_raw(102)));
    }

    #[test]
    fn empty_registry() {
        let mut scanner = Scanner::new(
            Replay(vec![vec![process(1, 1), process(2, 1)]]),
            FilterRegistry::new(),
            &config(),
        );
        let report = scanner.tick(Timestamp::from_secs(0)).unwrap();
        assert_eq!(report.processes, 2);
        assert_eq!(report.matches, 0);
    }
}
