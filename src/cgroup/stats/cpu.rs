//! CPU accounting files of both cgroup generations.
//!
//! - [`CpuStat`]: the unified hierarchy's `cpu.stat`, in microseconds.
//! - [`CpuacctStat`]: the legacy `cpuacct.stat`, in clock ticks (`USER_HZ`).
//! - [`CpuacctUsage`]: the legacy `cpuacct.usage`, `cpuacct.usage_user` and
//!   `cpuacct.usage_sys` files, each a single nanosecond counter.
//!
//! # Examples
//!
//! ```rust
//! use cgroup_exporter::cgroup::stats::{CpuStat, CpuacctUsage, KeyValueStat, SingleLineStat};
//!
//! let data = "usage_usec 1000000\nuser_usec 600000\nsystem_usec 400000\nnr_periods 10\n";
//! let cpu_stat = CpuStat::from_reader(&mut data.as_bytes()).unwrap();
//! assert_eq!(cpu_stat.system_usec, 400000);
//!
//! let usage = CpuacctUsage::from_reader(&mut "123456789\n".as_bytes()).unwrap();
//! assert_eq!(usage.0, 123456789);
//! ```

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::LazyLock;

use super::parser::read_single_u64;
use super::{KeyValueStat, SingleLineStat};

/// Represents parsed data from a cgroup v2 `cpu.stat` file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuStat {
    /// Total time (in microseconds) that the cgroup used CPU (user + system).
    pub usage_usec: u64,
    /// Time (in microseconds) spent in user space.
    pub user_usec: u64,
    /// Time (in microseconds) spent in kernel (system) space.
    pub system_usec: u64,
}

type CpuStatSetter = fn(&mut CpuStat, u64);

static CPU_STAT_SETTERS: LazyLock<HashMap<&'static str, CpuStatSetter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, CpuStatSetter> = HashMap::with_capacity(3);

    m.insert("usage_usec", |s, v| s.usage_usec = v);
    m.insert("user_usec", |s, v| s.user_usec = v);
    m.insert("system_usec", |s, v| s.system_usec = v);

    m
});

impl KeyValueStat for CpuStat {
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &CPU_STAT_SETTERS
    }
}

/// Represents parsed data from a cgroup v1 `cpuacct.stat` file.
///
/// Both values are in clock ticks of `USER_HZ`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuacctStat {
    pub user: u64,
    pub system: u64,
}

type CpuacctStatSetter = fn(&mut CpuacctStat, u64);

static CPUACCT_STAT_SETTERS: LazyLock<HashMap<&'static str, CpuacctStatSetter>> =
    LazyLock::new(|| {
        let mut m: HashMap<&'static str, CpuacctStatSetter> = HashMap::with_capacity(2);

        m.insert("user", |s, v| s.user = v);
        m.insert("system", |s, v| s.system = v);

        m
    });

impl KeyValueStat for CpuacctStat {
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &CPUACCT_STAT_SETTERS
    }
}

/// A single cumulative CPU time counter in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuacctUsage(pub u64);

impl SingleLineStat for CpuacctUsage {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        read_single_u64(buf).map(CpuacctUsage)
    }
}
