//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::cgroup::LabelScheme;
use crate::fsutil;

/// Exports CPU and memory accounting of cgroups (batch jobs, user sessions) for Prometheus.
#[derive(Debug, Clone, Parser)]
#[command(name = "cgroup-exporter", version, about)]
pub struct Config {
    /// Address the scrape endpoint listens on.
    #[arg(long, env = "CGROUP_EXPORTER_LISTEN_ADDRESS", default_value = "0.0.0.0:2112")]
    pub listen_address: SocketAddr,

    /// Root cgroup, relative to the hierarchy mount point (e.g. `/slurm`, `user.slice`).
    #[arg(long, env = "CGROUP_EXPORTER_ROOT", default_value = "/slurm")]
    pub root: String,

    /// Glob patterns of the sub-cgroups to export, relative to the root.
    #[arg(
        long,
        env = "CGROUP_EXPORTER_PATTERNS",
        value_delimiter = ' ',
        default_values = ["/uid_*", "/uid_*/job_*"]
    )]
    pub sub_cgroup_patterns: Vec<String>,

    /// Also export resident memory usage.
    #[arg(long, env = "CGROUP_EXPORTER_MEMORY")]
    pub memory: bool,

    /// Value of the `host` label. Defaults to the host name.
    #[arg(long, env = "CGROUP_EXPORTER_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "CGROUP_EXPORTER_LABEL_SCHEME", value_enum, default_value_t)]
    pub label_scheme: LabelScheme,

    /// Where the host root filesystem is mounted when running in a container.
    #[arg(long, env = "ROOTFS_MOUNT_PATH", default_value = "/")]
    pub rootfs: PathBuf,

    /// Do not export the root cgroup itself.
    #[arg(long, env = "CGROUP_EXPORTER_SKIP_ROOT")]
    pub skip_root: bool,
}

impl Config {
    /// Returns the configured host label, or the host name of the machine.
    ///
    /// # Errors
    ///
    /// Fails if no host was configured and neither `<rootfs>/etc/hostname` nor
    /// `/proc/sys/kernel/hostname` can be read.
    pub fn resolve_host(&self) -> std::io::Result<String> {
        if let Some(host) = &self.host {
            return Ok(host.clone());
        }
        let hostname = std::fs::read_to_string(fsutil::rebase(&self.rootfs, "etc/hostname"))
            .or_else(|_| std::fs::read_to_string("/proc/sys/kernel/hostname"))?;
        Ok(hostname.trim().to_owned())
    }

    pub fn mountinfo_path(&self) -> PathBuf {
        fsutil::rebase(&self.rootfs, "proc/1/mountinfo")
    }
}
