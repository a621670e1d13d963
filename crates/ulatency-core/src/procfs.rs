//! Process source backed by procfs.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use glob::glob;
use nix::{
    errno::Errno,
    unistd::{Gid, Pid, Uid},
};
use thiserror::Error;

use crate::snapshot::ProcessSnapshot;

const DEFAULT_PROCFS: &str = "/proc";

#[derive(Error, Debug)]
pub enum ProcfsError {
    #[error("reading {path} failed")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },
    #[error("malformed stat for process {0}")]
    InvalidStat(Pid),
    #[error("globbing running processes")]
    GlobbingError(#[from] glob::PatternError),
    #[error("unreadable entry")]
    GlobError(#[from] glob::GlobError),
    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),
}

impl ProcfsError {
    /// True if the error comes from a process which exited while we were reading it.
    pub fn is_vanished(&self) -> bool {
        matches!(self, ProcfsError::ReadFile { source, .. }
            if source.kind() == io::ErrorKind::NotFound
                // returned when reading files of a process being reaped
                || source.raw_os_error() == Some(Errno::ESRCH as i32))
    }
}

/// Supplies the complete set of live processes once per tick.
///
/// The returned vector is owned by the caller, so anything happening to the
/// processes afterwards doesn't change what a tick sees.
pub trait ProcessSource {
    fn snapshot(&mut self) -> Result<Vec<ProcessSnapshot>, ProcfsError>;
}

/// [`ProcessSource`] reading `/proc`.
#[derive(Debug, Clone)]
pub struct ProcfsSource {
    root: PathBuf,
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new(DEFAULT_PROCFS)
    }
}

impl ProcfsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Pids of every process currently listed in procfs.
    pub fn running_processes(&self) -> Result<Vec<Pid>, ProcfsError> {
        glob(&format!("{}/[0-9]*", self.root.display()))?
            .map(|entry| {
                let entry = entry?;
                let pid = entry.file_name().unwrap_or_default().to_string_lossy().parse()?;
                Ok(Pid::from_raw(pid))
            })
            .collect()
    }

    /// Read every attribute of a single process.
    pub fn read_process(&self, pid: Pid) -> Result<ProcessSnapshot, ProcfsError> {
        let dir = self.root.join(pid.to_string());

        let stat = parse_stat(pid, &read_lossy(&dir.join("stat"))?)?;
        let status = parse_status(&read_lossy(&dir.join("status"))?)?;
        let argv = parse_cmdline(&read_bytes(&dir.join("cmdline"))?);
        let comm = read_lossy(&dir.join("comm"))?.trim().to_owned();
        // Missing for kernel threads, unreadable for other users' processes
        // unless we're root.
        let exe = fs::read_link(dir.join("exe")).ok();
        let cgroups = read_lossy(&dir.join("cgroup"))
            .map(|data| parse_cgroups(&data))
            .unwrap_or_default();

        let basename = exe
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(comm);

        let mut builder = ProcessSnapshot::builder(pid)
            .ppid(stat.ppid)
            .state(stat.state)
            .start_time(stat.start_time)
            .argv(argv)
            .basename(basename)
            .uid(status.uid)
            .gid(status.gid)
            .memory(status.rss_kib, status.vm_size_kib)
            .cgroups(cgroups);
        if let Some(exe) = exe {
            builder = builder.exe(exe);
        }
        Ok(builder.build())
    }
}

impl ProcessSource for ProcfsSource {
    fn snapshot(&mut self) -> Result<Vec<ProcessSnapshot>, ProcfsError> {
        let pids = self.running_processes()?;
        let mut snapshots = Vec::with_capacity(pids.len());
        for pid in pids {
            match self.read_process(pid) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) if err.is_vanished() => {
                    log::trace!("process {pid} exited while reading procfs");
                }
                Err(err) => log::debug!("skipping process {pid}: {err}"),
            }
        }
        Ok(snapshots)
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ProcfsError> {
    fs::read(path).map_err(|source| ProcfsError::ReadFile {
        source,
        path: path.display().to_string(),
    })
}

/// Command lines and names are arbitrary bytes: invalid UTF-8 is replaced,
/// the process is still reported.
fn read_lossy(path: &Path) -> Result<String, ProcfsError> {
    read_bytes(path).map(|data| String::from_utf8_lossy(&data).into_owned())
}

#[derive(Debug, PartialEq, Eq)]
struct Stat {
    state: char,
    ppid: Pid,
    start_time: u64,
}

/// Parse `/proc/<pid>/stat`. The command name is enclosed in parentheses and
/// may itself contain spaces and parentheses, so fields are counted from the
/// last `)`.
fn parse_stat(pid: Pid, data: &str) -> Result<Stat, ProcfsError> {
    let rest = data
        .rfind(')')
        .map(|idx| &data[idx + 1..])
        .ok_or(ProcfsError::InvalidStat(pid))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 of proc(5)
    let state = fields
        .first()
        .and_then(|s| s.chars().next())
        .ok_or(ProcfsError::InvalidStat(pid))?;
    let ppid = fields.get(1).ok_or(ProcfsError::InvalidStat(pid))?.parse()?;
    let start_time = fields.get(19).ok_or(ProcfsError::InvalidStat(pid))?.parse()?;
    Ok(Stat {
        state,
        ppid: Pid::from_raw(ppid),
        start_time,
    })
}

#[derive(Debug, PartialEq, Eq)]
struct Status {
    uid: Uid,
    gid: Gid,
    rss_kib: u64,
    vm_size_kib: u64,
}

/// Parse the fields of `/proc/<pid>/status` we care about. Memory lines are
/// missing for kernel threads.
fn parse_status(data: &str) -> Result<Status, ProcfsError> {
    let mut status = Status {
        uid: Uid::from_raw(0),
        gid: Gid::from_raw(0),
        rss_kib: 0,
        vm_size_kib: 0,
    };
    for line in data.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        // real id first, then effective, saved and filesystem ids
        let first = value.split_whitespace().next().unwrap_or_default();
        match key {
            "Uid" => status.uid = Uid::from_raw(first.parse()?),
            "Gid" => status.gid = Gid::from_raw(first.parse()?),
            "VmRSS" => status.rss_kib = first.parse()?,
            "VmSize" => status.vm_size_kib = first.parse()?,
            _ => {}
        }
    }
    Ok(status)
}

fn parse_cmdline(data: &[u8]) -> Vec<String> {
    data.split(|&byte| byte == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

/// Cgroup paths, one per hierarchy (`hierarchy-ID:controllers:path`).
fn parse_cgroups(data: &str) -> Vec<String> {
    data.lines()
        .filter_map(|line| line.splitn(3, ':').nth(2))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "4242 (tmux: server) S 1 4242 4242 0 -1 4194368 3101 0 0 0 \
        142 93 0 0 20 0 1 0 98765 14442496 1096 18446744073709551615 1 1 0 0 0 0 0 \
        3674112 134433283 0 0 0 17 3 0 0 0 0 0";

    #[test]
    fn stat_with_spaces_in_comm() {
        let stat = parse_stat(Pid::from_raw(4242), STAT).unwrap();
        assert_eq!(
            stat,
            Stat {
                state: 'S',
                ppid: Pid::from_raw(1),
                start_time: 98765,
            }
        );
    }

    #[test]
    fn truncated_stat() {
        assert!(matches!(
            parse_stat(Pid::from_raw(1), "1 (init) S 0"),
            Err(ProcfsError::InvalidStat(_))
        ));
        assert!(matches!(
            parse_stat(Pid::from_raw(1), "garbage"),
            Err(ProcfsError::InvalidStat(_))
        ));
    }

    #[test]
    fn status_fields() {
        let data = "Name:\tbash\nState:\tS (sleeping)\nUid:\t1000\t1000\t1000\t1000\n\
            Gid:\t100\t100\t100\t100\nVmSize:\t   10616 kB\nVmRSS:\t    5348 kB\n";
        let status = parse_status(data).unwrap();
        assert_eq!(status.uid, Uid::from_raw(1000));
        assert_eq!(status.gid, Gid::from_raw(100));
        assert_eq!(status.rss_kib, 5348);
        assert_eq!(status.vm_size_kib, 10616);
    }

    #[test]
    fn kernel_thread_status() {
        let status =
            parse_status("Name:\tkthreadd\nUid:\t0\t0\t0\t0\nGid:\t0\t0\t0\t0\n").unwrap();
        assert_eq!(status.rss_kib, 0);
    }

    #[test]
    fn cmdline_and_cgroups() {
        assert_eq!(
            parse_cmdline(b"stress\0--cpu\04\0"),
            vec!["stress", "--cpu", "4"]
        );
        assert!(parse_cmdline(b"").is_empty());
        assert_eq!(
            parse_cmdline(b"sleep\0caf\xe9\0"),
            vec!["sleep", "caf\u{FFFD}"]
        );
        assert_eq!(
            parse_cgroups("0::/user.slice/user-1000.slice/session-2.scope\n"),
            vec!["/user.slice/user-1000.slice/session-2.scope"]
        );
    }

    #[test]
    fn reads_own_process() {
        let source = ProcfsSource::default();
        let me = Pid::this();
        assert!(source.running_processes().unwrap().contains(&me));
        let snapshot = source.read_process(me).unwrap();
        assert_eq!(snapshot.pid(), me);
        assert!(!snapshot.argv().is_empty());
        assert_eq!(snapshot.uid(), Uid::current());
    }

    #[test]
    fn non_utf8_process_is_kept() {
        let root = std::env::temp_dir().join(format!("procfs-lossy-{}", std::process::id()));
        let dir = root.join("4242");
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stat"), STAT).unwrap();
        fs::write(dir.join("status"), b"Name:\tw\xffrk\nUid:\t1000\t1000\t1000\t1000\n").unwrap();
        fs::write(dir.join("cmdline"), b"/usr/bin/w\xffrk\0--fast\0").unwrap();
        fs::write(dir.join("comm"), b"w\xffrk\n").unwrap();

        let mut source = ProcfsSource::new(&root);
        let snapshots = source.snapshot().unwrap();
        assert_eq!(snapshots.len(), 1);
        let process = &snapshots[0];
        assert_eq!(process.pid(), Pid::from_raw(4242));
        assert_eq!(process.basename(), "w\u{FFFD}rk");
        assert_eq!(process.argv(), ["/usr/bin/w\u{FFFD}rk", "--fast"]);
        assert_eq!(process.uid(), Uid::from_raw(1000));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_process_is_vanished() {
        let source = ProcfsSource::new("/nonexistent-procfs");
        let err = source.read_process(Pid::from_raw(1)).unwrap_err();
        assert!(err.is_vanished());
    }
}
