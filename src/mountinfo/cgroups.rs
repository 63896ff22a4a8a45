use crate::fsutil;

use super::parser::parse_mount_info_line;
use super::{Error, Result};
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Version of a mounted cgroup filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// `cgroup` filesystem, one hierarchy per controller (or controller group).
    V1,
    /// `cgroup2` filesystem, the single unified hierarchy.
    V2,
}

/// A cgroup filesystem found in a mountinfo file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupMount {
    /// Mount point, as seen by the process that owns the mountinfo file.
    pub mount_point: PathBuf,
    pub version: CgroupVersion,
    /// Superblock options. For v1 mounts these include the attached controllers
    /// (e.g. `cpu`, `cpuacct`, `memory`).
    pub options: Vec<String>,
}

impl CgroupMount {
    /// Returns `true` if this is a v1 hierarchy with the given controller attached.
    pub fn has_controller(&self, controller: &str) -> bool {
        self.version == CgroupVersion::V1 && self.options.iter().any(|o| o == controller)
    }
}

/// Lists every cgroup (v1 and v2) filesystem mounted according to a `mountinfo` file.
///
/// Non-cgroup entries are skipped. Entries are returned in file order.
///
/// # Errors
///
/// - [`Error::FileOpen`] if the file can't be opened.
/// - [`Error::ReadLine`] if reading from the file fails.
/// - [`Error::Parse`] if any line is malformed.
///
/// # Example
///
/// ```no_run
/// use cgroup_exporter::mountinfo::read_cgroup_mounts;
///
/// for mount in read_cgroup_mounts("/proc/self/mountinfo").unwrap() {
///     println!("{:?} at {}", mount.version, mount.mount_point.display());
/// }
/// ```
pub fn read_cgroup_mounts(path: impl AsRef<Path>) -> Result<Vec<CgroupMount>> {
    let path = path.as_ref();
    let buf = fsutil::open_file_reader(path)?;

    read_cgroup_mounts_from_reader(buf, path)
}

fn read_cgroup_mounts_from_reader<R: BufRead>(mut reader: R, origin: &Path) -> Result<Vec<CgroupMount>> {
    let mut line = String::with_capacity(256);
    let mut lineno = 0;
    let mut mounts = Vec::new();

    while reader
        .read_line(&mut line)
        .map_err(|source| Error::ReadLine {
            path: origin.to_path_buf(),
            source,
        })?
        != 0
    {
        lineno += 1;
        if line.trim().is_empty() {
            line.clear();
            continue;
        }

        let info = parse_mount_info_line(line.trim_end()).map_err(|source| Error::Parse {
            path: origin.to_path_buf(),
            line: lineno,
            source,
        })?;
        let version = match info.fs_type {
            "cgroup2" => Some(CgroupVersion::V2),
            "cgroup" => Some(CgroupVersion::V1),
            _ => None,
        };
        if let Some(version) = version {
            log::debug!(
                "Found {:?} cgroup mount point `{}` with options `{}`",
                version,
                info.mount_point,
                info.super_options
            );
            mounts.push(CgroupMount {
                mount_point: PathBuf::from(info.mount_point.as_ref()),
                version,
                options: info.options().map(str::to_owned).collect(),
            });
        }

        line.clear();
    }

    Ok(mounts)
}
