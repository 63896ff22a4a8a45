//! Discovery and accounting of cgroup scopes (jobs, user sessions) on both cgroup generations.
//!
//! # Key Components
//!
//! - [`Hierarchy`] — the detected hierarchy generation and the mount points to read from,
//!   built once at startup by [`detect`].
//! - [`ScopeConfig`] — the root cgroup plus glob patterns, resolved to live [`ScopePath`]s
//!   on every scrape.
//! - [`extract_identity`] / [`LabelScheme`] — turn a cgroup path into series labels.
//! - [`read_counters`] — reads a [`CounterSet`] from the generation-specific files.
//!
//! # Files read
//!
//! - unified: `cpu.stat`, `memory.stat`
//! - legacy: `cpuacct.usage`, `cpuacct.usage_user`, `cpuacct.usage_sys` (or `cpuacct.stat`),
//!   and `memory.stat` in the memory controller tree
//!
//! # Platform Requirements
//!
//! - Linux with cgroup v1 (`cpuacct` controller mounted) or cgroup v2.
//! - Read access to the cgroup filesystem.
pub mod counters;
pub mod hierarchy;
mod identity;
pub mod scope;
pub mod stats;

pub use counters::{CounterSet, read_counters};
pub use hierarchy::{Hierarchy, HierarchyMode, Layout, detect, detect_mode};
pub use identity::{Identity, LabelScheme, extract_identity};
pub use scope::{Pattern, PatternError, ScopeConfig, ScopePath};
