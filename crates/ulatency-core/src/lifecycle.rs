use std::collections::HashMap;

use nix::unistd::Pid;

use crate::{registry::FilterRegistry, snapshot::ProcessSnapshot};

/// Detects exited processes between two ticks and evicts them from every
/// filter cache, before their pid can be handed out again.
///
/// A process is identified by its pid and start time: a pid seen again with a
/// different start time was recycled by the kernel between two ticks, and the
/// old process is reported as exited.
pub struct ProcessLifecycle {
    registry: FilterRegistry,
    /// live processes seen at the last tick
    known: HashMap<Pid, u64>,
}

impl ProcessLifecycle {
    pub fn new(registry: FilterRegistry) -> Self {
        Self {
            registry,
            known: HashMap::new(),
        }
    }

    /// Compare `processes` with the previous tick, evict every process which
    /// is gone and return their pids.
    pub fn observe(&mut self, processes: &[ProcessSnapshot]) -> Vec<Pid> {
        let current: HashMap<Pid, u64> = processes
            .iter()
            .map(|p| (p.pid(), p.start_time()))
            .collect();

        let exited: Vec<Pid> = self
            .known
            .iter()
            .filter(|&(pid, start_time)| current.get(pid) != Some(start_time))
            .map(|(pid, _)| *pid)
            .collect();

        for pid in &exited {
            log::trace!("process {pid} exited");
            self.registry.evict(*pid);
        }
        self.known = current;
        exited
    }

    /// Exit notification coming from outside the scan loop.
    pub fn notify_exit(&mut self, pid: Pid) {
        self.known.remove(&pid);
        self.registry.evict(pid);
    }

    pub fn tracked(&self) -> usize {
        self.known.len()
    }
}
