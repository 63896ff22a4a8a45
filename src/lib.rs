//! cgroup exporter: per-job and per-session CPU and memory accounting for Prometheus.
//!
//! The cgroup hierarchy is detected once at startup. Every scrape then resolves the
//! configured cgroups afresh, derives their labels from the cgroup path and reads their
//! counters from the legacy (v1) or unified (v2) accounting files.
use std::sync::Arc;

use prometheus::Registry;

use crate::cgroup::ScopeConfig;
use crate::collector::{CgroupCollector, CollectorContext};
use crate::config::Config;

pub mod api;
pub mod cgroup;
pub mod collector;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod mountinfo;

/// Runs the exporter until the HTTP server stops.
///
/// # Errors
///
/// Possible errors include:
/// - No cgroup hierarchy mounted, or `cpuacct` missing on a legacy host.
/// - A malformed sub-cgroup pattern, or a root cgroup that does not exist.
/// - Memory metrics requested on a host without a memory controller.
/// - Failure to bind the listen address.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    log::debug!("Final rootfs: {}", config.rootfs.display());
    let hierarchy = cgroup::detect(config.mountinfo_path(), &config.rootfs)?;

    let scopes = ScopeConfig::new(&config.root, &config.sub_cgroup_patterns)?
        .anchored_in(&hierarchy)?;
    log::info!(
        "Exporting cgroup `{}` and sub-cgroups matching {:?}",
        scopes.root(),
        scopes.patterns().iter().map(|p| p.as_str()).collect::<Vec<_>>()
    );

    let host = config.resolve_host()?;
    log::debug!("Hostname: {}", &host);

    let collector = CgroupCollector::new(CollectorContext {
        hierarchy,
        scopes,
        label_scheme: config.label_scheme,
        host,
        memory: config.memory,
        report_root: !config.skip_root,
    })?;

    let registry = Registry::new();
    registry.register(Box::new(collector))?;

    api::APIServer::new(Arc::new(registry))
        .listen(config.listen_address)
        .await?;
    Ok(())
}
