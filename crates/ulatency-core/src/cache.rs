use std::collections::HashMap;

use nix::unistd::Pid;

use crate::{filter::ActionOutcome, time::Timestamp};

/// What a filter should do with a process according to its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Nothing cached, the filter must be evaluated.
    Miss,
    /// Skip the filter while `now < expiry`.
    SkipUntil(Timestamp),
    /// Skip the filter until the entry is evicted.
    SkipForever,
}

impl CacheLookup {
    pub fn is_skip(&self) -> bool {
        !matches!(self, CacheLookup::Miss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipDecision {
    Until(Timestamp),
    Forever,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Per filter skip decisions, keyed by pid.
///
/// Pids are recycled by the kernel: the owner must call [`DecisionCache::evict`]
/// when a process exits, otherwise a new process with the same pid would inherit
/// the decision taken for the old one.
#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: HashMap<Pid, SkipDecision>,
    stats: CacheStats,
}

impl DecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached decision for `pid`. Expired entries are removed and
    /// reported as [`CacheLookup::Miss`].
    pub fn lookup(&mut self, pid: Pid, now: Timestamp) -> CacheLookup {
        let lookup = match self.entries.get(&pid) {
            None => CacheLookup::Miss,
            Some(SkipDecision::Forever) => CacheLookup::SkipForever,
            Some(SkipDecision::Until(expiry)) if now < *expiry => CacheLookup::SkipUntil(*expiry),
            Some(SkipDecision::Until(_)) => {
                self.entries.remove(&pid);
                CacheLookup::Miss
            }
        };
        if lookup.is_skip() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        lookup
    }

    /// Store the decision returned by an action for `pid`, replacing any
    /// previous one. [`ActionOutcome::NoCache`] writes nothing and leaves an
    /// existing entry untouched.
    pub fn record(&mut self, pid: Pid, now: Timestamp, outcome: ActionOutcome) -> CacheLookup {
        let decision = match outcome {
            ActionOutcome::NoCache => return CacheLookup::Miss,
            ActionOutcome::SkipFor(timeout) if timeout.is_zero() => SkipDecision::Forever,
            ActionOutcome::SkipFor(timeout) => SkipDecision::Until(now + timeout),
            ActionOutcome::SkipForever => SkipDecision::Forever,
        };
        self.entries.insert(pid, decision);
        match decision {
            SkipDecision::Until(expiry) => CacheLookup::SkipUntil(expiry),
            SkipDecision::Forever => CacheLookup::SkipForever,
        }
    }

    /// Forget anything known about `pid`. Returns true if there was an entry.
    pub fn evict(&mut self, pid: Pid) -> bool {
        let evicted = self.entries.remove(&pid).is_some();
        if evicted {
            self.stats.evictions += 1;
        }
        evicted
    }

    /// Remove every bounded entry which expired at `now`.
    pub fn purge_expired(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, decision| match decision {
            SkipDecision::Until(expiry) => now < *expiry,
            SkipDecision::Forever => true,
        });
        before - self.entries.len()
    }

    /// Keep only the entries whose pid satisfies `f`.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(Pid) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|pid, _| f(*pid));
        self.stats.evictions += (before - self.entries.len()) as u64;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const PID: Pid = Pid::from_raw(42);

    fn at(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn empty_cache_misses() {
        let mut cache = DecisionCache::new();
        assert_eq!(cache.lookup(PID, at(0)), CacheLookup::Miss);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn bounded_skip_expires() {
        let mut cache = DecisionCache::new();
        let recorded = cache.record(PID, at(100), ActionOutcome::SkipFor(Duration::from_secs(10)));
        assert_eq!(recorded, CacheLookup::SkipUntil(at(110)));

        for now in [100, 105, 109] {
            assert_eq!(cache.lookup(PID, at(now)), CacheLookup::SkipUntil(at(110)));
        }
        // one nanosecond before expiry is still cached
        assert!(cache.lookup(PID, Timestamp::from_nanos(at(110).as_nanos() - 1)).is_skip());
        assert_eq!(cache.lookup(PID, at(110)), CacheLookup::Miss);
        // expired entries are removed on lookup
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(PID, at(105)), CacheLookup::Miss);
    }

    #[test]
    fn permanent_skip_until_evicted() {
        let mut cache = DecisionCache::new();
        cache.record(PID, at(0), ActionOutcome::SkipForever);
        assert_eq!(cache.lookup(PID, at(1)), CacheLookup::SkipForever);
        assert_eq!(cache.lookup(PID, at(1_000_000)), CacheLookup::SkipForever);
        assert_eq!(cache.purge_expired(at(1_000_000)), 0);

        assert!(cache.evict(PID));
        assert_eq!(cache.lookup(PID, at(1_000_001)), CacheLookup::Miss);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn zero_timeout_is_permanent() {
        let mut cache = DecisionCache::new();
        cache.record(PID, at(0), ActionOutcome::SkipFor(Duration::ZERO));
        assert_eq!(cache.lookup(PID, at(500)), CacheLookup::SkipForever);
    }

    #[test]
    fn no_cache_writes_nothing() {
        let mut cache = DecisionCache::new();
        assert_eq!(cache.record(PID, at(0), ActionOutcome::NoCache), CacheLookup::Miss);
        assert!(cache.is_empty());

        cache.record(PID, at(0), ActionOutcome::SkipForever);
        cache.record(PID, at(1), ActionOutcome::NoCache);
        assert_eq!(cache.lookup(PID, at(2)), CacheLookup::SkipForever);
    }

    #[test]
    fn record_overwrites() {
        let mut cache = DecisionCache::new();
        cache.record(PID, at(0), ActionOutcome::SkipForever);
        cache.record(PID, at(0), ActionOutcome::SkipFor(Duration::from_secs(1)));
        assert_eq!(cache.lookup(PID, at(2)), CacheLookup::Miss);
    }

    #[test]
    fn evict_clears_any_state() {
        let mut cache = DecisionCache::new();
        assert!(!cache.evict(PID));
        cache.record(PID, at(0), ActionOutcome::SkipFor(Duration::from_secs(60)));
        cache.evict(PID);
        assert_eq!(cache.lookup(PID, at(1)), CacheLookup::Miss);
    }

    #[test]
    fn purge_and_retain() {
        let mut cache = DecisionCache::new();
        let other = Pid::from_raw(43);
        let forever = Pid::from_raw(44);
        cache.record(PID, at(0), ActionOutcome::SkipFor(Duration::from_secs(5)));
        cache.record(other, at(0), ActionOutcome::SkipFor(Duration::from_secs(50)));
        cache.record(forever, at(0), ActionOutcome::SkipForever);

        assert_eq!(cache.purge_expired(at(10)), 1);
        assert_eq!(cache.len(), 2);

        cache.retain(|pid| pid == forever);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(forever, at(10)), CacheLookup::SkipForever);
        assert_eq!(cache.lookup(other, at(10)), CacheLookup::Miss);
    }
}
