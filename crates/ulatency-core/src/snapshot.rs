use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Pid, Uid};

/// Read-only view of one process, valid for a single scan tick.
///
/// A snapshot is built once by the process source and never mutated afterwards:
/// it exposes no `&mut self` method, filters only read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pid: Pid,
    ppid: Pid,
    start_time: u64,
    argv: Vec<String>,
    cmdline: String,
    basename: String,
    exe: Option<PathBuf>,
    uid: Uid,
    gid: Gid,
    state: char,
    rss_kib: u64,
    vm_size_kib: u64,
    cgroups: Vec<String>,
}

impl ProcessSnapshot {
    pub fn builder(pid: Pid) -> ProcessSnapshotBuilder {
        ProcessSnapshotBuilder {
            inner: ProcessSnapshot {
                pid,
                ppid: Pid::from_raw(0),
                start_time: 0,
                argv: Vec::new(),
                cmdline: String::new(),
                basename: String::new(),
                exe: None,
                uid: Uid::from_raw(0),
                gid: Gid::from_raw(0),
                state: 'R',
                rss_kib: 0,
                vm_size_kib: 0,
                cgroups: Vec::new(),
            },
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn ppid(&self) -> Pid {
        self.ppid
    }

    /// Start time in clock ticks after boot. Together with the pid it
    /// identifies a process across pid reuse.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Arguments joined by a single space, the string command line patterns are
    /// matched against.
    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn exe(&self) -> Option<&Path> {
        self.exe.as_deref()
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    /// Single letter scheduler state as found in `/proc/<pid>/stat`.
    pub fn state(&self) -> char {
        self.state
    }

    pub fn rss_kib(&self) -> u64 {
        self.rss_kib
    }

    pub fn vm_size_kib(&self) -> u64 {
        self.vm_size_kib
    }

    pub fn cgroups(&self) -> &[String] {
        &self.cgroups
    }

    /// True for kernel threads, which have no command line.
    pub fn is_kernel_thread(&self) -> bool {
        self.argv.is_empty() && self.exe.is_none()
    }
}

/// Builder used by process sources (and tests) to assemble a [`ProcessSnapshot`].
#[derive(Debug, Clone)]
pub struct ProcessSnapshotBuilder {
    inner: ProcessSnapshot,
}

impl ProcessSnapshotBuilder {
    pub fn ppid(mut self, ppid: Pid) -> Self {
        self.inner.ppid = ppid;
        self
    }

    pub fn start_time(mut self, start_time: u64) -> Self {
        self.inner.start_time = start_time;
        self
    }

    pub fn argv<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.argv = argv.into_iter().map(Into::into).collect();
        self.inner.cmdline = self.inner.argv.join(" ");
        self
    }

    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.inner.basename = basename.into();
        self
    }

    pub fn exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.inner.exe = Some(exe.into());
        self
    }

    pub fn uid(mut self, uid: Uid) -> Self {
        self.inner.uid = uid;
        self
    }

    pub fn gid(mut self, gid: Gid) -> Self {
        self.inner.gid = gid;
        self
    }

    pub fn state(mut self, state: char) -> Self {
        self.inner.state = state;
        self
    }

    pub fn memory(mut self, rss_kib: u64, vm_size_kib: u64) -> Self {
        self.inner.rss_kib = rss_kib;
        self.inner.vm_size_kib = vm_size_kib;
        self
    }

    pub fn cgroups(mut self, cgroups: Vec<String>) -> Self {
        self.inner.cgroups = cgroups;
        self
    }

    pub fn build(self) -> ProcessSnapshot {
        self.inner
    }
}
