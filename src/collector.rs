//! Per-scrape collection: resolve scopes, label them, read their counters.
//!
//! [`CgroupCollector`] implements [`prometheus::core::Collector`], so registering it in a
//! [`prometheus::Registry`] makes every `gather` walk the cgroup tree afresh. Nothing read
//! during one scrape survives into the next.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounterVec, IntGaugeVec, Opts};

use crate::cgroup::{CounterSet, Hierarchy, HierarchyMode, LabelScheme, ScopeConfig, read_counters};
use crate::error::ResultOkLogExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Monotonically non-decreasing for the life of a scope.
    Counter,
    Gauge,
}

/// Name, help text and kind of one exported measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: ValueKind,
}

pub const CPU_KERNEL_NS: MetricDescriptor = MetricDescriptor {
    name: "cpu_kernel_ns",
    help: "Cumulative kernel-mode CPU time (ns on cgroup v1, usec on cgroup v2)",
    kind: ValueKind::Counter,
};

pub const CPU_USER_NS: MetricDescriptor = MetricDescriptor {
    name: "cpu_user_ns",
    help: "Cumulative user-mode CPU time (ns on cgroup v1, usec on cgroup v2)",
    kind: ValueKind::Counter,
};

pub const CPU_TOTAL_NS: MetricDescriptor = MetricDescriptor {
    name: "cpu_total_ns",
    help: "Cumulative total CPU time (ns on cgroup v1, usec on cgroup v2)",
    kind: ValueKind::Counter,
};

pub const MEM_USAGE_BYTES: MetricDescriptor = MetricDescriptor {
    name: "mem_usage_bytes",
    help: "Current resident memory usage in bytes",
    kind: ValueKind::Gauge,
};

/// One sample produced during a scrape. Label values follow the order of
/// [`LabelScheme::label_names`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub descriptor: MetricDescriptor,
    pub value: u64,
    pub labels: Vec<String>,
}

impl Observation {
    fn label_refs(&self) -> Vec<&str> {
        self.labels.iter().map(String::as_str).collect()
    }
}

/// Everything the collector needs, fixed at startup.
#[derive(Debug, Clone)]
pub struct CollectorContext {
    pub hierarchy: Hierarchy,
    pub scopes: ScopeConfig,
    pub label_scheme: LabelScheme,
    /// Value of the `host` label under [`LabelScheme::Job`].
    pub host: String,
    pub memory: bool,
    /// Whether the root scope itself is exported.
    pub report_root: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("memory metrics requested but the {0} hierarchy has no memory controller mounted")]
    MemoryUnsupported(HierarchyMode),
    #[error("invalid metric description: {0}")]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Debug)]
pub struct CgroupCollector {
    context: CollectorContext,
    descriptors: Vec<MetricDescriptor>,
    descs: Vec<Desc>,
}

impl CgroupCollector {
    /// Creates a collector for the given context.
    ///
    /// # Errors
    ///
    /// Fails if memory metrics are enabled on a host that cannot provide them.
    pub fn new(context: CollectorContext) -> Result<Self, Error> {
        if context.memory && !context.hierarchy.supports_memory() {
            return Err(Error::MemoryUnsupported(context.hierarchy.mode()));
        }

        let mut descriptors = vec![CPU_KERNEL_NS, CPU_USER_NS, CPU_TOTAL_NS];
        if context.memory {
            descriptors.push(MEM_USAGE_BYTES);
        }

        let label_names: Vec<String> = context
            .label_scheme
            .label_names()
            .iter()
            .map(|name| (*name).to_owned())
            .collect();
        let descs = descriptors
            .iter()
            .map(|d| {
                Desc::new(
                    d.name.to_owned(),
                    d.help.to_owned(),
                    label_names.clone(),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self {
            context,
            descriptors,
            descs,
        })
    }

    /// The measurements this collector may report.
    pub fn describe(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    /// Resolves the configured scopes and reads their counters.
    ///
    /// Scopes without an identity, and scopes whose counters cannot be read, are skipped.
    /// The remaining scopes are reported regardless. An empty result is not an error.
    pub fn collect_observations(&self) -> Vec<Observation> {
        let started = Instant::now();
        let ctx = &self.context;
        let mut observations = Vec::new();
        let mut seen = HashSet::new();

        for scope in ctx.scopes.resolve(&ctx.hierarchy) {
            let is_root = scope == *ctx.scopes.root();
            if is_root && !ctx.report_root {
                continue;
            }
            let Some(labels) = ctx.label_scheme.label_values(&scope, is_root, &ctx.host) else {
                log::debug!(target: "cgroup collector", "skipping scope `{scope}`: no identity in path");
                continue;
            };
            let Some(counters) =
                read_counters(&ctx.hierarchy, &scope, ctx.memory).ok_log(scope.as_str())
            else {
                continue;
            };
            if !seen.insert(labels.clone()) {
                log::debug!(
                    target: "cgroup collector",
                    "skipping scope `{scope}`: labels {labels:?} already reported"
                );
                continue;
            }
            push_observations(&counters, labels, &mut observations);
        }

        log::trace!(
            target: "cgroup collector",
            "collected {} observations in {:?}",
            observations.len(),
            started.elapsed()
        );
        observations
    }
}

fn push_observations(counters: &CounterSet, labels: Vec<String>, out: &mut Vec<Observation>) {
    let mut push = |descriptor, value| {
        out.push(Observation {
            descriptor,
            value,
            labels: labels.clone(),
        })
    };
    push(CPU_KERNEL_NS, counters.cpu_kernel_ns);
    push(CPU_USER_NS, counters.cpu_user_ns);
    push(CPU_TOTAL_NS, counters.cpu_total_ns);
    if let Some(bytes) = counters.memory_bytes {
        push(MEM_USAGE_BYTES, bytes);
    }
}

fn build_family(
    descriptor: &MetricDescriptor,
    label_names: &[&str],
    observations: &[Observation],
) -> prometheus::Result<Vec<MetricFamily>> {
    let opts = Opts::new(descriptor.name, descriptor.help);
    let samples = observations.iter().filter(|o| o.descriptor == *descriptor);
    match descriptor.kind {
        ValueKind::Counter => {
            let vec = IntCounterVec::new(opts, label_names)?;
            for obs in samples {
                vec.get_metric_with_label_values(obs.label_refs().as_slice())?
                    .inc_by(obs.value);
            }
            Ok(vec.collect())
        }
        ValueKind::Gauge => {
            let vec = IntGaugeVec::new(opts, label_names)?;
            for obs in samples {
                vec.get_metric_with_label_values(obs.label_refs().as_slice())?
                    .set(i64::try_from(obs.value).unwrap_or(i64::MAX));
            }
            Ok(vec.collect())
        }
    }
}

impl Collector for CgroupCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let observations = self.collect_observations();
        let label_names = self.context.label_scheme.label_names();

        let mut families = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            match build_family(descriptor, label_names, &observations) {
                Ok(family) => families.extend(family),
                Err(err) => log::error!(
                    target: "cgroup collector",
                    "failed building metric family `{}`: {}",
                    descriptor.name,
                    err
                ),
            }
        }
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write_files(dir: &Path, files: &[(&str, &str)]) {
        fs::create_dir_all(dir).unwrap();
        for (name, contents) in files {
            fs::write(dir.join(name), contents).unwrap();
        }
    }

    fn legacy_job(cpuacct: &Path, job: &str, kernel: u64, user: u64, total: u64) {
        write_files(
            &cpuacct.join(job),
            &[
                ("cpuacct.usage", &format!("{total}\n")),
                ("cpuacct.usage_user", &format!("{user}\n")),
                ("cpuacct.usage_sys", &format!("{kernel}\n")),
            ],
        );
    }

    fn context(hierarchy: Hierarchy, patterns: &[&str]) -> CollectorContext {
        CollectorContext {
            hierarchy,
            scopes: ScopeConfig::new("/slurm", patterns).unwrap(),
            label_scheme: LabelScheme::Job,
            host: "node1".to_owned(),
            memory: false,
            report_root: true,
        }
    }

    fn obs(descriptor: MetricDescriptor, value: u64, labels: &[&str]) -> Observation {
        Observation {
            descriptor,
            value,
            labels: labels.iter().map(|l| (*l).to_owned()).collect(),
        }
    }

    #[test]
    fn test_describe() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("slurm")).unwrap();

        let collector =
            CgroupCollector::new(context(Hierarchy::unified(tmp.path()), &["uid_*"])).unwrap();
        assert_eq!(collector.describe(), &[CPU_KERNEL_NS, CPU_USER_NS, CPU_TOTAL_NS]);
        assert_eq!(collector.desc().len(), 3);

        let mut ctx = context(Hierarchy::unified(tmp.path()), &["uid_*"]);
        ctx.memory = true;
        let collector = CgroupCollector::new(ctx).unwrap();
        assert_eq!(collector.describe().len(), 4);
        assert_eq!(collector.describe()[3].kind, ValueKind::Gauge);
    }

    #[test]
    fn test_memory_requires_controller() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(Hierarchy::legacy(tmp.path(), None), &[]);
        ctx.memory = true;

        assert!(matches!(
            CgroupCollector::new(ctx),
            Err(Error::MemoryUnsupported(HierarchyMode::Legacy))
        ));
    }

    #[test]
    fn test_legacy_job() {
        let tmp = tempfile::tempdir().unwrap();
        legacy_job(tmp.path(), "slurm/uid_1001/job_55", 100, 200, 300);

        let collector =
            CgroupCollector::new(context(Hierarchy::legacy(tmp.path(), None), &["uid_*/job_*"]))
                .unwrap();

        let labels = ["1001", "55", "node1"];
        assert_eq!(
            collector.collect_observations(),
            vec![
                obs(CPU_KERNEL_NS, 100, &labels),
                obs(CPU_USER_NS, 200, &labels),
                obs(CPU_TOTAL_NS, 300, &labels),
            ]
        );
    }

    #[test]
    fn test_unified_job() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(
            &tmp.path().join("slurm/uid_1001/job_55"),
            &[("cpu.stat", "usage_usec 90\nuser_usec 50\nsystem_usec 40\n")],
        );

        let collector =
            CgroupCollector::new(context(Hierarchy::unified(tmp.path()), &["uid_*/job_*"]))
                .unwrap();

        let labels = ["1001", "55", "node1"];
        assert_eq!(
            collector.collect_observations(),
            vec![
                obs(CPU_KERNEL_NS, 40, &labels),
                obs(CPU_USER_NS, 90, &labels),
                obs(CPU_TOTAL_NS, 90, &labels),
            ]
        );
    }

    #[test]
    fn test_root_reported_with_empty_identity() {
        let tmp = tempfile::tempdir().unwrap();
        legacy_job(tmp.path(), "slurm", 1, 2, 3);
        legacy_job(tmp.path(), "slurm/uid_1/job_2", 4, 5, 9);

        let mut ctx = context(Hierarchy::legacy(tmp.path(), None), &["uid_*/job_*"]);
        let collector = CgroupCollector::new(ctx.clone()).unwrap();
        let observations = collector.collect_observations();
        assert_eq!(observations.len(), 6);
        assert_eq!(observations[0], obs(CPU_KERNEL_NS, 1, &["", "", "node1"]));

        ctx.report_root = false;
        let collector = CgroupCollector::new(ctx).unwrap();
        let observations = collector.collect_observations();
        assert_eq!(observations.len(), 3);
        assert!(observations.iter().all(|o| o.labels[0] == "1"));
    }

    #[test]
    fn test_failure_isolation() {
        let tmp = tempfile::tempdir().unwrap();
        legacy_job(tmp.path(), "slurm/uid_1/job_1", 1, 1, 2);
        write_files(
            &tmp.path().join("slurm/uid_1/job_2"),
            &[("cpuacct.usage", "not a number\n")],
        );
        legacy_job(tmp.path(), "slurm/uid_1/job_3", 3, 3, 6);

        let collector =
            CgroupCollector::new(context(Hierarchy::legacy(tmp.path(), None), &["uid_*/job_*"]))
                .unwrap();

        let jobs: Vec<_> = collector
            .collect_observations()
            .into_iter()
            .filter(|o| o.descriptor == CPU_TOTAL_NS)
            .map(|o| (o.labels[1].clone(), o.value))
            .collect();
        assert_eq!(jobs, vec![("1".to_owned(), 2), ("3".to_owned(), 6)]);
    }

    #[test]
    fn test_collect_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        legacy_job(tmp.path(), "slurm/uid_1/job_1", 1, 1, 2);
        legacy_job(tmp.path(), "slurm/uid_2/job_7", 5, 6, 11);

        let collector =
            CgroupCollector::new(context(Hierarchy::legacy(tmp.path(), None), &["uid_*/job_*"]))
                .unwrap();

        let first = collector.collect_observations();
        assert_eq!(first.len(), 6);
        assert_eq!(first, collector.collect_observations());
    }

    #[test]
    fn test_new_jobs_are_picked_up() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("slurm")).unwrap();

        let collector =
            CgroupCollector::new(context(Hierarchy::legacy(tmp.path(), None), &["uid_*/job_*"]))
                .unwrap();
        assert!(collector.collect_observations().is_empty());

        legacy_job(tmp.path(), "slurm/uid_1/job_1", 1, 1, 2);
        assert_eq!(collector.collect_observations().len(), 3);

        fs::remove_dir_all(tmp.path().join("slurm/uid_1")).unwrap();
        assert!(collector.collect_observations().is_empty());
    }

    #[test]
    fn test_cgroup_label_scheme() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(
            &tmp.path().join("slurm/batch"),
            &[
                ("cpu.stat", "usage_usec 3\nsystem_usec 1\n"),
                ("memory.stat", "anon 4096\n"),
            ],
        );

        let mut ctx = context(Hierarchy::unified(tmp.path()), &["*"]);
        ctx.label_scheme = LabelScheme::Cgroup;
        ctx.memory = true;
        let collector = CgroupCollector::new(ctx).unwrap();

        let observations = collector.collect_observations();
        assert_eq!(observations.len(), 4);
        assert_eq!(observations[3], obs(MEM_USAGE_BYTES, 4096, &["/slurm/batch"]));
    }

    #[test]
    fn test_concurrent_collections_agree() {
        let tmp = tempfile::tempdir().unwrap();
        for job in 0..8 {
            legacy_job(
                tmp.path(),
                &format!("slurm/uid_{}/job_{job}", job % 3),
                job,
                job * 2,
                job * 3,
            );
        }

        let collector =
            CgroupCollector::new(context(Hierarchy::legacy(tmp.path(), None), &["uid_*/job_*"]))
                .unwrap();
        let expected = collector.collect_observations();
        assert_eq!(expected.len(), 24);

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| collector.collect_observations()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for observations in results {
            assert_eq!(observations, expected);
        }
    }

    #[test]
    fn test_registry_exposition() {
        let tmp = tempfile::tempdir().unwrap();
        legacy_job(tmp.path(), "slurm/uid_1001/job_55", 100, 200, 300);

        let collector =
            CgroupCollector::new(context(Hierarchy::legacy(tmp.path(), None), &["uid_*/job_*"]))
                .unwrap();
        let registry = prometheus::Registry::new();
        registry.register(Box::new(collector)).unwrap();

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();

        for (name, value) in [("cpu_kernel_ns", "100"), ("cpu_user_ns", "200"), ("cpu_total_ns", "300")] {
            assert!(text.contains(&format!("# TYPE {name} counter")), "{text}");
            let line = text
                .lines()
                .find(|l| l.starts_with(&format!("{name}{{")))
                .unwrap_or_else(|| panic!("no sample for {name}: {text}"));
            assert!(line.contains(r#"uid="1001""#), "{line}");
            assert!(line.contains(r#"jobid="55""#), "{line}");
            assert!(line.contains(r#"host="node1""#), "{line}");
            assert!(line.ends_with(&format!(" {value}")), "{line}");
        }
        assert!(!text.contains("mem_usage_bytes"));
    }
}
