//! Mapping from cgroup paths to the labels identifying a series.

use std::sync::LazyLock;

use regex::Regex;

use super::ScopePath;

/// Batch scheduler layout: `.../uid_<uid>/job_<jobid>`.
static JOB_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/uid_(?<uid>[0-9]+)/job_(?<job>[0-9]+)$").expect("valid job regex")
});

/// systemd user sessions: `.../user-<name>.slice`.
static USER_SLICE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/user-(?<user>[^/]+)\.slice$").expect("valid user slice regex")
});

/// The owner and job a cgroup belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    /// Empty for user sessions, which are not jobs.
    pub job_id: String,
}

/// Extracts the identity encoded in a cgroup path.
///
/// Returns `None` if the path follows neither the `uid_<N>/job_<M>` nor the
/// `user-<name>.slice` convention.
///
/// ```
/// # use cgroup_exporter::cgroup::{ScopePath, extract_identity};
/// let identity = extract_identity(&ScopePath::new("/slurm/uid_42/job_7")).unwrap();
/// assert_eq!((identity.user_id.as_str(), identity.job_id.as_str()), ("42", "7"));
/// assert!(extract_identity(&ScopePath::new("/slurm/uid_abc/job_7")).is_none());
/// ```
pub fn extract_identity(path: &ScopePath) -> Option<Identity> {
    if let Some(caps) = JOB_REGEX.captures(path.as_str()) {
        return Some(Identity {
            user_id: caps["uid"].to_owned(),
            job_id: caps["job"].to_owned(),
        });
    }
    USER_SLICE_REGEX
        .captures(path.as_str())
        .map(|caps| Identity {
            user_id: caps["user"].to_owned(),
            job_id: String::new(),
        })
}

/// Which labels identify a series. Chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LabelScheme {
    /// `uid`, `jobid` and `host`, taken from the cgroup naming convention.
    /// Cgroups that do not follow the convention are not exported.
    #[default]
    Job,
    /// A single `cgroup` label holding the cgroup path. Every resolved cgroup is exported.
    Cgroup,
}

impl LabelScheme {
    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            LabelScheme::Job => &["uid", "jobid", "host"],
            LabelScheme::Cgroup => &["cgroup"],
        }
    }

    /// Computes the label values of a scope, in the order of [`LabelScheme::label_names`].
    ///
    /// The root scope has no identity under the `Job` scheme and gets empty `uid` and
    /// `jobid` values. Any other scope without an identity yields `None`.
    pub fn label_values(&self, scope: &ScopePath, is_root: bool, host: &str) -> Option<Vec<String>> {
        match self {
            LabelScheme::Cgroup => Some(vec![scope.to_string()]),
            LabelScheme::Job if is_root => Some(vec![String::new(), String::new(), host.to_owned()]),
            LabelScheme::Job => {
                let identity = extract_identity(scope)?;
                Some(vec![identity.user_id, identity.job_id, host.to_owned()])
            }
        }
    }
}
