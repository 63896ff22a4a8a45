//! Detection of the mounted cgroup hierarchy generation.
//!
//! Detection runs once at startup. The result is an immutable [`Hierarchy`] that tells the
//! scope resolver where to enumerate cgroups and the counter reader which files to read.

use std::path::{Path, PathBuf};

use crate::fsutil;
use crate::mountinfo::{self, CgroupMount, CgroupVersion};

/// Where systemd and most distributions mount the cgroup filesystem(s).
const CGROUP_BASE: &str = "/sys/fs/cgroup";

/// The cgroup hierarchy generation active on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyMode {
    /// Only per-controller (v1) hierarchies are mounted.
    Legacy,
    /// v1 controllers are mounted alongside a unified tree (usually `/sys/fs/cgroup/unified`)
    /// that carries no controllers. Accounting is read from the v1 controllers.
    Hybrid,
    /// The single unified (v2) hierarchy is mounted at the cgroup base.
    Unified,
    /// No cgroup filesystem is mounted.
    Unavailable,
}

impl std::fmt::Display for HierarchyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HierarchyMode::Legacy => "legacy",
            HierarchyMode::Hybrid => "hybrid",
            HierarchyMode::Unified => "unified",
            HierarchyMode::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// How counters are laid out on disk. Decided once, then used for every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// Per-controller trees. Scopes are enumerated in the `cpuacct` tree.
    Legacy {
        cpuacct: PathBuf,
        memory: Option<PathBuf>,
    },
    /// One tree holding every controller's files.
    Unified { root: PathBuf },
}

/// The detected hierarchy: its generation and the mount points to read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    mode: HierarchyMode,
    layout: Layout,
    /// Mount point of the enumeration tree as listed in mountinfo, before rebasing.
    host_root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read mount table: {0}")]
    Mountinfo(#[from] mountinfo::Error),
    #[error("no cgroup filesystem is mounted according to `{path}`")]
    Unavailable { path: PathBuf },
    #[error("the `{controller}` cgroup controller is not mounted")]
    MissingController { controller: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the cgroup mounts listed in a mountinfo file.
///
/// # Errors
///
/// Returns [`Error::Mountinfo`] if the file cannot be read or parsed. An absence of cgroup
/// mounts is not an error here; it yields [`HierarchyMode::Unavailable`].
pub fn detect_mode(mountinfo_path: impl AsRef<Path>) -> Result<HierarchyMode> {
    let mounts = mountinfo::read_cgroup_mounts(mountinfo_path)?;
    Ok(classify(&mounts))
}

/// Detects the active hierarchy and resolves its mount points below `rootfs`.
///
/// # Errors
///
/// - [`Error::Mountinfo`] if the mount table cannot be read.
/// - [`Error::Unavailable`] if no cgroup filesystem is mounted.
/// - [`Error::MissingController`] if a legacy or hybrid host has no `cpuacct` hierarchy.
pub fn detect(mountinfo_path: impl AsRef<Path>, rootfs: impl AsRef<Path>) -> Result<Hierarchy> {
    let mountinfo_path = mountinfo_path.as_ref();
    let mounts = mountinfo::read_cgroup_mounts(mountinfo_path)?;
    let mode = classify(&mounts);
    let hierarchy = Hierarchy::from_mounts(mode, &mounts, rootfs.as_ref()).map_err(|e| match e {
        Error::Unavailable { .. } => Error::Unavailable {
            path: mountinfo_path.to_path_buf(),
        },
        other => other,
    })?;
    log::info!("Detected {} cgroup hierarchy: {:?}", mode, hierarchy.layout);
    Ok(hierarchy)
}

fn classify(mounts: &[CgroupMount]) -> HierarchyMode {
    let has_v1 = mounts.iter().any(|m| m.version == CgroupVersion::V1);
    let v2_at_base = mounts
        .iter()
        .any(|m| m.version == CgroupVersion::V2 && m.mount_point == Path::new(CGROUP_BASE));
    let has_v2 = mounts.iter().any(|m| m.version == CgroupVersion::V2);

    match (v2_at_base, has_v1, has_v2) {
        (true, _, _) => HierarchyMode::Unified,
        (false, true, true) => HierarchyMode::Hybrid,
        (false, true, false) => HierarchyMode::Legacy,
        (false, false, true) => HierarchyMode::Unified,
        (false, false, false) => HierarchyMode::Unavailable,
    }
}

impl Hierarchy {
    /// Builds the hierarchy for an already classified set of mounts.
    ///
    /// # Errors
    ///
    /// See [`detect`].
    pub fn from_mounts(mode: HierarchyMode, mounts: &[CgroupMount], rootfs: &Path) -> Result<Self> {
        let (layout, host_root) = match mode {
            HierarchyMode::Unavailable => {
                return Err(Error::Unavailable {
                    path: PathBuf::from(CGROUP_BASE),
                });
            }
            HierarchyMode::Unified => {
                let mount = mounts
                    .iter()
                    .filter(|m| m.version == CgroupVersion::V2)
                    .find(|m| m.mount_point == Path::new(CGROUP_BASE))
                    .or_else(|| mounts.iter().find(|m| m.version == CgroupVersion::V2))
                    .ok_or(Error::Unavailable {
                        path: PathBuf::from(CGROUP_BASE),
                    })?;
                let layout = Layout::Unified {
                    root: fsutil::rebase(rootfs, &mount.mount_point),
                };
                (layout, mount.mount_point.clone())
            }
            HierarchyMode::Legacy | HierarchyMode::Hybrid => {
                let controller_mount = |controller: &str| {
                    mounts.iter().find(|m| m.has_controller(controller))
                };
                let cpuacct = controller_mount("cpuacct").ok_or(Error::MissingController {
                    controller: "cpuacct",
                })?;
                let layout = Layout::Legacy {
                    cpuacct: fsutil::rebase(rootfs, &cpuacct.mount_point),
                    memory: controller_mount("memory")
                        .map(|m| fsutil::rebase(rootfs, &m.mount_point)),
                };
                (layout, cpuacct.mount_point.clone())
            }
        };

        Ok(Self {
            mode,
            layout,
            host_root,
        })
    }

    /// Builds a unified hierarchy rooted at `root` without consulting a mount table.
    pub fn unified(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            mode: HierarchyMode::Unified,
            host_root: root.clone(),
            layout: Layout::Unified { root },
        }
    }

    /// Builds a legacy hierarchy from explicit controller mount points.
    pub fn legacy(cpuacct: impl Into<PathBuf>, memory: Option<PathBuf>) -> Self {
        let cpuacct = cpuacct.into();
        Self {
            mode: HierarchyMode::Legacy,
            host_root: cpuacct.clone(),
            layout: Layout::Legacy { cpuacct, memory },
        }
    }

    pub fn mode(&self) -> HierarchyMode {
        self.mode
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The tree in which scopes are enumerated.
    ///
    /// Every cgroup exists in the `cpuacct` tree on legacy hosts, because that is the
    /// controller the exporter reads.
    pub fn enumeration_root(&self) -> &Path {
        match &self.layout {
            Layout::Legacy { cpuacct, .. } => cpuacct,
            Layout::Unified { root } => root,
        }
    }

    /// [`Hierarchy::enumeration_root`] as the host sees it, i.e. without the rootfs prefix.
    pub fn host_enumeration_root(&self) -> &Path {
        &self.host_root
    }

    /// Returns `true` if memory counters can be read on this host.
    pub fn supports_memory(&self) -> bool {
        match &self.layout {
            Layout::Legacy { memory, .. } => memory.is_some(),
            Layout::Unified { .. } => true,
        }
    }
}

/// Joins a cgroup path (e.g. `/slurm/uid_1/job_2`) to a hierarchy mount point.
pub(crate) fn cgroup_dir(mount: &Path, cgroup: &str) -> PathBuf {
    mount.join(cgroup.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const UNIFIED: &str = "\
35 24 0:30 / /sys/fs/cgroup rw,nosuid,nodev,noexec,relatime shared:9 - cgroup2 cgroup2 rw,nsdelegate
";

    const HYBRID: &str = "\
33 25 0:28 / /sys/fs/cgroup ro,nosuid,nodev,noexec shared:9 - tmpfs tmpfs ro,mode=755
34 33 0:29 / /sys/fs/cgroup/unified rw,nosuid,nodev,noexec,relatime shared:10 - cgroup2 cgroup2 rw,nsdelegate
38 33 0:33 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid,nodev,noexec,relatime shared:15 - cgroup cgroup rw,cpu,cpuacct
41 33 0:36 / /sys/fs/cgroup/memory rw,nosuid,nodev,noexec,relatime shared:18 - cgroup cgroup rw,memory
";

    const LEGACY: &str = "\
33 25 0:28 / /sys/fs/cgroup ro,nosuid,nodev,noexec shared:9 - tmpfs tmpfs ro,mode=755
38 33 0:33 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid,nodev,noexec,relatime shared:15 - cgroup cgroup rw,cpu,cpuacct
";

    const NONE: &str = "\
25 1 0:24 / /proc rw,relatime - proc proc rw
26 1 0:25 / /sys rw,relatime - sysfs sysfs rw
";

    fn mountinfo(contents: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(contents.as_bytes()).unwrap();
        tmp
    }

    #[test]
    fn test_detect_all_modes() {
        for (contents, expected) in [
            (UNIFIED, HierarchyMode::Unified),
            (HYBRID, HierarchyMode::Hybrid),
            (LEGACY, HierarchyMode::Legacy),
            (NONE, HierarchyMode::Unavailable),
        ] {
            let file = mountinfo(contents);
            assert_eq!(detect_mode(file.path()).unwrap(), expected);
        }
    }

    #[test]
    fn test_detect_unified_layout() {
        let file = mountinfo(UNIFIED);
        let hierarchy = detect(file.path(), "/").unwrap();
        assert_eq!(hierarchy.mode(), HierarchyMode::Unified);
        assert_eq!(hierarchy.enumeration_root(), Path::new("/sys/fs/cgroup"));
        assert!(hierarchy.supports_memory());
    }

    #[test]
    fn test_detect_hybrid_reads_v1_controllers() {
        let file = mountinfo(HYBRID);
        let hierarchy = detect(file.path(), "/rootfs").unwrap();
        assert_eq!(hierarchy.mode(), HierarchyMode::Hybrid);
        assert_eq!(
            hierarchy.layout(),
            &Layout::Legacy {
                cpuacct: PathBuf::from("/rootfs/sys/fs/cgroup/cpu,cpuacct"),
                memory: Some(PathBuf::from("/rootfs/sys/fs/cgroup/memory")),
            }
        );
    }

    #[test]
    fn test_host_root_is_not_rebased() {
        let file = mountinfo(HYBRID);
        let hierarchy = detect(file.path(), "/rootfs").unwrap();
        assert_eq!(
            hierarchy.enumeration_root(),
            Path::new("/rootfs/sys/fs/cgroup/cpu,cpuacct")
        );
        assert_eq!(
            hierarchy.host_enumeration_root(),
            Path::new("/sys/fs/cgroup/cpu,cpuacct")
        );
    }

    #[test]
    fn test_detect_legacy_without_memory_controller() {
        let file = mountinfo(LEGACY);
        let hierarchy = detect(file.path(), "/").unwrap();
        assert_eq!(hierarchy.mode(), HierarchyMode::Legacy);
        assert!(!hierarchy.supports_memory());
    }

    #[test]
    fn test_detect_unavailable_is_an_error() {
        let file = mountinfo(NONE);
        match detect(file.path(), "/").unwrap_err() {
            Error::Unavailable { path } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_detect_legacy_without_cpuacct_is_an_error() {
        let file = mountinfo(
            "41 33 0:36 / /sys/fs/cgroup/memory rw,nosuid,nodev,noexec,relatime shared:18 - cgroup cgroup rw,memory\n",
        );
        let err = detect(file.path(), "/").unwrap_err();
        assert!(matches!(
            err,
            Error::MissingController {
                controller: "cpuacct"
            }
        ));
    }

    #[test]
    fn test_unified_outside_base_without_v1() {
        let mounts = vec![CgroupMount {
            mount_point: PathBuf::from("/custom/cgroup2"),
            version: CgroupVersion::V2,
            options: vec![],
        }];
        assert_eq!(classify(&mounts), HierarchyMode::Unified);
        let hierarchy = Hierarchy::from_mounts(HierarchyMode::Unified, &mounts, Path::new("/")).unwrap();
        assert_eq!(hierarchy.enumeration_root(), Path::new("/custom/cgroup2"));
    }

    #[test]
    fn test_cgroup_dir_strips_leading_slash() {
        assert_eq!(
            cgroup_dir(Path::new("/sys/fs/cgroup"), "/slurm/uid_1"),
            PathBuf::from("/sys/fs/cgroup/slurm/uid_1")
        );
    }
}
