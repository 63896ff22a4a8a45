//! Resident memory figures from `memory.stat`, for both cgroup generations.
//!
//! The unified hierarchy reports anonymous memory as `anon`; the legacy memory controller
//! reports it as `rss`, plus `total_rss` which also covers descendant cgroups. Batch
//! schedulers place processes in child cgroups of the job (job steps), so the hierarchical
//! value is the one describing the job.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::{KeyValueStat, StatParseError};

/// Represents the subset of `memory.stat` used for resident memory.
///
/// Fields are `None` when the key is absent from the file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryStat {
    /// Anonymous memory in bytes (cgroup v2).
    pub anon: Option<u64>,
    /// Resident set size of this cgroup only, in bytes (cgroup v1).
    pub rss: Option<u64>,
    /// Resident set size including descendants, in bytes (cgroup v1).
    pub total_rss: Option<u64>,
}

impl MemoryStat {
    /// Resident memory as reported by a cgroup v2 `memory.stat`.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::MissingField`] if `anon` was not present.
    pub fn unified_resident_bytes(&self) -> Result<u64, StatParseError> {
        self.anon
            .ok_or(StatParseError::MissingField { field: "anon" })
    }

    /// Resident memory as reported by a cgroup v1 `memory.stat`.
    ///
    /// Prefers the hierarchical `total_rss` and falls back to `rss`.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::MissingField`] if neither key was present.
    pub fn legacy_resident_bytes(&self) -> Result<u64, StatParseError> {
        self.total_rss
            .or(self.rss)
            .ok_or(StatParseError::MissingField { field: "total_rss" })
    }
}

type Setter = fn(&mut MemoryStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(3);

    m.insert("anon", |s, v| s.anon = Some(v));
    m.insert("rss", |s, v| s.rss = Some(v));
    m.insert("total_rss", |s, v| s.total_rss = Some(v));

    m
});

impl KeyValueStat for MemoryStat {
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}
