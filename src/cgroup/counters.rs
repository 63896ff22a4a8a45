//! Reading the accounting counters of one cgroup, normalized across hierarchy generations.

use std::path::{Path, PathBuf};

use super::ScopePath;
use super::hierarchy::{Hierarchy, Layout};
use super::stats::{
    CpuStat, CpuacctStat, CpuacctUsage, KeyValueStat, MemoryStat, ReadStatError, SingleLineStat,
    StatParseError, read_stat_file,
};

/// `USER_HZ`, the unit of `cpuacct.stat`. Fixed at 100 on every Linux architecture.
const USER_HZ: u64 = 100;
const NANOS_PER_TICK: u64 = 1_000_000_000 / USER_HZ;

/// The counters of one cgroup at one point in time.
///
/// On the unified hierarchy `cpu_user_ns` carries the combined usage and is always equal to
/// `cpu_total_ns`. Only the legacy hierarchy provides a true user/kernel split.
///
/// Unified values are passed through as the kernel reports them in `cpu.stat`
/// (`usage_usec`, `system_usec`) and keep the microsecond resolution of that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSet {
    pub cpu_kernel_ns: u64,
    pub cpu_user_ns: u64,
    pub cpu_total_ns: u64,
    /// Resident memory in bytes, if memory collection is enabled.
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Stat(#[from] ReadStatError),
    #[error("invalid memory statistics in `{path}`: {source}")]
    Memory {
        path: PathBuf,
        #[source]
        source: StatParseError,
    },
    #[error("the memory controller is not mounted")]
    NoMemoryController,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reads the counters of `scope`, using the layout of `hierarchy`.
///
/// # Errors
///
/// Fails if any required file is missing or malformed. A scope that vanished after it was
/// resolved fails with a not-found [`ReadStatError`].
pub fn read_counters(hierarchy: &Hierarchy, scope: &ScopePath, memory: bool) -> Result<CounterSet> {
    match hierarchy.layout() {
        Layout::Legacy {
            cpuacct,
            memory: memory_mount,
        } => {
            let mut counters = read_legacy_cpu(&scope.dir_in(cpuacct))?;
            if memory {
                let mount = memory_mount.as_deref().ok_or(Error::NoMemoryController)?;
                counters.memory_bytes = Some(read_memory(&scope.dir_in(mount), |stat| {
                    stat.legacy_resident_bytes()
                })?);
            }
            Ok(counters)
        }
        Layout::Unified { root } => {
            let dir = scope.dir_in(root);
            let mut counters = read_unified_cpu(&dir)?;
            if memory {
                counters.memory_bytes =
                    Some(read_memory(&dir, |stat| stat.unified_resident_bytes())?);
            }
            Ok(counters)
        }
    }
}

fn read_legacy_cpu(dir: &Path) -> Result<CounterSet> {
    let total = read_stat_file(dir, "cpuacct.usage", CpuacctUsage::from_reader)?.0;

    // usage_user and usage_sys exist since Linux 4.7, cpuacct.stat is the fallback
    let split = read_stat_file(dir, "cpuacct.usage_user", CpuacctUsage::from_reader).and_then(
        |user| {
            read_stat_file(dir, "cpuacct.usage_sys", CpuacctUsage::from_reader)
                .map(|sys| (sys.0, user.0))
        },
    );
    let (kernel, user) = match split {
        Ok(split) => split,
        Err(err) if err.is_not_found() => {
            let stat = read_stat_file(dir, "cpuacct.stat", CpuacctStat::from_reader)?;
            (
                stat.system.saturating_mul(NANOS_PER_TICK),
                stat.user.saturating_mul(NANOS_PER_TICK),
            )
        }
        Err(err) => return Err(err.into()),
    };

    Ok(CounterSet {
        cpu_kernel_ns: kernel,
        cpu_user_ns: user,
        cpu_total_ns: total,
        memory_bytes: None,
    })
}

fn read_unified_cpu(dir: &Path) -> Result<CounterSet> {
    let stat = read_stat_file(dir, "cpu.stat", CpuStat::from_reader)?;

    Ok(CounterSet {
        cpu_kernel_ns: stat.system_usec,
        cpu_user_ns: stat.usage_usec,
        cpu_total_ns: stat.usage_usec,
        memory_bytes: None,
    })
}

fn read_memory(
    dir: &Path,
    resident: impl FnOnce(&MemoryStat) -> std::result::Result<u64, StatParseError>,
) -> Result<u64> {
    let stat = read_stat_file(dir, "memory.stat", MemoryStat::from_reader)?;
    resident(&stat).map_err(|source| Error::Memory {
        path: dir.join("memory.stat"),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_files(dir: &Path, files: &[(&str, &str)]) {
        fs::create_dir_all(dir).unwrap();
        for (name, contents) in files {
            fs::write(dir.join(name), contents).unwrap();
        }
    }

    #[test]
    fn test_legacy_split_counters() {
        let tmp = tempfile::tempdir().unwrap();
        let cpuacct = tmp.path().join("cpuacct");
        write_files(
            &cpuacct.join("slurm/uid_1001/job_55"),
            &[
                ("cpuacct.usage", "300\n"),
                ("cpuacct.usage_user", "200\n"),
                ("cpuacct.usage_sys", "100\n"),
            ],
        );
        let hierarchy = Hierarchy::legacy(&cpuacct, None);

        let counters =
            read_counters(&hierarchy, &ScopePath::new("/slurm/uid_1001/job_55"), false).unwrap();
        assert_eq!(
            counters,
            CounterSet {
                cpu_kernel_ns: 100,
                cpu_user_ns: 200,
                cpu_total_ns: 300,
                memory_bytes: None,
            }
        );
    }

    #[test]
    fn test_legacy_falls_back_to_ticks() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(
            &tmp.path().join("job"),
            &[
                ("cpuacct.usage", "50000000000\n"),
                ("cpuacct.stat", "user 300\nsystem 200\n"),
            ],
        );
        let hierarchy = Hierarchy::legacy(tmp.path(), None);

        let counters = read_counters(&hierarchy, &ScopePath::new("/job"), false).unwrap();
        assert_eq!(counters.cpu_user_ns, 3_000_000_000);
        assert_eq!(counters.cpu_kernel_ns, 2_000_000_000);
        assert_eq!(counters.cpu_total_ns, 50_000_000_000);
    }

    #[test]
    fn test_legacy_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let cpuacct = tmp.path().join("cpuacct");
        let memory = tmp.path().join("memory");
        write_files(
            &cpuacct.join("job"),
            &[
                ("cpuacct.usage", "3\n"),
                ("cpuacct.usage_user", "2\n"),
                ("cpuacct.usage_sys", "1\n"),
            ],
        );
        write_files(&memory.join("job"), &[("memory.stat", "rss 10\ntotal_rss 4096\n")]);

        let hierarchy = Hierarchy::legacy(&cpuacct, Some(memory));
        let counters = read_counters(&hierarchy, &ScopePath::new("/job"), true).unwrap();
        assert_eq!(counters.memory_bytes, Some(4096));

        let without_memory = Hierarchy::legacy(&cpuacct, None);
        assert!(matches!(
            read_counters(&without_memory, &ScopePath::new("/job"), true),
            Err(Error::NoMemoryController)
        ));
    }

    #[test]
    fn test_unified_normalization() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(
            &tmp.path().join("slurm/uid_1001/job_55"),
            &[
                ("cpu.stat", "usage_usec 90\nuser_usec 50\nsystem_usec 40\n"),
                ("memory.stat", "anon 8192\nfile 100\n"),
            ],
        );
        let hierarchy = Hierarchy::unified(tmp.path());

        let counters =
            read_counters(&hierarchy, &ScopePath::new("/slurm/uid_1001/job_55"), true).unwrap();
        assert_eq!(counters.cpu_kernel_ns, 40);
        assert_eq!(counters.cpu_user_ns, 90);
        assert_eq!(counters.cpu_total_ns, 90);
        assert_eq!(counters.cpu_user_ns, counters.cpu_total_ns);
        assert_eq!(counters.memory_bytes, Some(8192));
    }

    #[test]
    fn test_vanished_scope() {
        let tmp = tempfile::tempdir().unwrap();
        let hierarchy = Hierarchy::unified(tmp.path());

        match read_counters(&hierarchy, &ScopePath::new("/gone"), false).unwrap_err() {
            Error::Stat(err) => assert!(err.is_not_found()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_counter() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(&tmp.path().join("job"), &[("cpuacct.usage", "garbage\n")]);
        let hierarchy = Hierarchy::legacy(tmp.path(), None);

        match read_counters(&hierarchy, &ScopePath::new("/job"), false).unwrap_err() {
            Error::Stat(ReadStatError::Parse { path, source }) => {
                assert_eq!(path, tmp.path().join("job/cpuacct.usage"));
                assert_eq!(source.kind(), std::io::ErrorKind::InvalidData);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
