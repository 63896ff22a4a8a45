use clap::Parser;

use cgroup_exporter::config::Config;

/// Entry point of the cgroup exporter.
///
/// Detects the cgroup hierarchy once, then serves the counters of the configured cgroups
/// on every scrape.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=info cgroup-exporter --root /slurm --sub-cgroup-patterns "uid_* uid_*/job_*"
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config = Config::parse();
    cgroup_exporter::run(config).await
}
