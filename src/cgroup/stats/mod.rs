//! Parsers for the raw cgroup accounting files read by the counter reader.
//!
//! The unified hierarchy exposes `cpu.stat` and `memory.stat` in every cgroup directory.
//! The legacy hierarchy spreads the same information over per-controller trees:
//! `cpuacct.usage`, `cpuacct.usage_user`, `cpuacct.usage_sys` and `cpuacct.stat` in the
//! `cpuacct` tree, `memory.stat` in the `memory` tree.

mod cpu;
mod error;
mod memory;
mod parser;

pub use cpu::{CpuStat, CpuacctStat, CpuacctUsage};
pub use error::StatParseError;
pub use memory::MemoryStat;
pub use parser::{KeyValueStat, SingleLineStat};

use std::io;
use std::path::Path;

use crate::fsutil;

/// Opens `dir/file_name` and parses it with `parse`.
///
/// The open error keeps the full path, so a vanished cgroup is easy to spot in logs.
pub(crate) fn read_stat_file<T>(
    dir: &Path,
    file_name: &str,
    parse: impl FnOnce(&mut io::BufReader<std::fs::File>) -> io::Result<T>,
) -> Result<T, ReadStatError> {
    let path = dir.join(file_name);
    let mut reader = fsutil::open_file_reader(&path)?;
    parse(&mut reader).map_err(|source| ReadStatError::Parse { path, source })
}

/// Failure to read one stat file.
#[derive(Debug, thiserror::Error)]
pub enum ReadStatError {
    #[error(transparent)]
    Open(#[from] fsutil::FileOpenError),
    #[error("failed to read `{path}`: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReadStatError {
    /// Returns `true` if the file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReadStatError::Open(e) if e.source.kind() == io::ErrorKind::NotFound)
    }
}
