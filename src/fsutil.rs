use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use cgroup_exporter::fsutil;
/// let reader = fsutil::open_file_reader("/sys/fs/cgroup/cpu.stat")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Re-roots an absolute path below `rootfs`.
///
/// Used to translate paths as seen by the host (e.g. mount points from `mountinfo`) into
/// paths reachable from inside a container that has the host filesystem mounted at `rootfs`.
///
/// ```
/// # use cgroup_exporter::fsutil::rebase;
/// # use std::path::{Path, PathBuf};
/// assert_eq!(rebase("/rootfs", "/sys/fs/cgroup"), PathBuf::from("/rootfs/sys/fs/cgroup"));
/// assert_eq!(rebase("/", "/sys/fs/cgroup"), PathBuf::from("/sys/fs/cgroup"));
/// ```
pub fn rebase(rootfs: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    rootfs
        .as_ref()
        .join(path.strip_prefix("/").unwrap_or(path))
}
