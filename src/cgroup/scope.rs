//! Enumeration of the cgroup scopes to export.
//!
//! A [`ScopeConfig`] names a root cgroup and a list of glob patterns relative to it, such as
//! `uid_*/job_*`. On every scrape [`ScopeConfig::resolve`] walks the live cgroup tree and
//! returns the root followed by every directory currently matching a pattern. Nothing is
//! cached between calls: jobs start and end between scrapes.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use globset::{ErrorKind, GlobBuilder, GlobMatcher};

use super::hierarchy::{Hierarchy, cgroup_dir};

/// A cgroup path relative to the hierarchy mount point, always starting with `/`.
///
/// ```
/// # use cgroup_exporter::cgroup::ScopePath;
/// assert_eq!(ScopePath::new("slurm/").as_str(), "/slurm");
/// assert_eq!(ScopePath::new("/").as_str(), "/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopePath(String);

impl ScopePath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let trimmed = path.as_ref().trim_matches('/');
        Self(format!("/{trimmed}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the path of the child cgroup `name`.
    pub fn child(&self, name: &str) -> Self {
        if self.0 == "/" {
            Self(format!("/{name}"))
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    /// Returns the directory of this cgroup below the given mount point.
    pub fn dir_in(&self, mount: &Path) -> PathBuf {
        cgroup_dir(mount, &self.0)
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScopePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,
    #[error("unclosed character class in pattern `{0}`")]
    UnclosedClass(String),
    #[error("trailing escape character in pattern `{0}`")]
    TrailingEscape(String),
    #[error("invalid pattern `{pattern}`: {reason}")]
    Invalid { pattern: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("root cgroup `{scope}` does not exist at `{path}`")]
    RootNotFound { scope: ScopePath, path: PathBuf },
    #[error("failed to check root cgroup at `{path}`: {source}")]
    RootCheck {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
enum Segment {
    /// A plain directory name.
    Literal(String),
    /// A name containing wildcards.
    Glob(GlobMatcher),
}

impl Segment {
    fn parse(segment: &str, pattern: &str) -> Result<Self, PatternError> {
        if !segment.contains(['*', '?', '[', '{', '\\']) {
            return Ok(Segment::Literal(segment.to_owned()));
        }

        let glob = GlobBuilder::new(segment)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|err| match err.kind() {
                ErrorKind::UnclosedClass => PatternError::UnclosedClass(pattern.to_owned()),
                ErrorKind::DanglingEscape => PatternError::TrailingEscape(pattern.to_owned()),
                _ => PatternError::Invalid {
                    pattern: pattern.to_owned(),
                    reason: err.to_string(),
                },
            })?;
        Ok(Segment::Glob(glob.compile_matcher()))
    }
}

/// A compiled glob pattern, relative to the root scope.
///
/// Segments are separated by `/` and matched against one directory level each. Supported
/// wildcards: `*`, `?`, `[abc]`, `[a-z]`, `[!abc]`, `{a,b}` and `\` escapes. A leading `/` is
/// ignored.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] if the pattern is empty or malformed.
    pub fn new(raw: &str) -> Result<Self, PatternError> {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| Segment::parse(s, raw))
            .collect::<Result<Vec<_>, _>>()?;
        if segments.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lists the existing cgroups below `base` that match this pattern.
    ///
    /// Matches within one directory are sorted by name.
    fn expand(&self, mount: &Path, base: &ScopePath) -> Vec<ScopePath> {
        let mut current = vec![base.clone()];
        for segment in &self.segments {
            let mut next = Vec::new();
            for scope in &current {
                let dir = scope.dir_in(mount);
                match segment {
                    Segment::Literal(name) => {
                        if dir.join(name).is_dir() {
                            next.push(scope.child(name));
                        }
                    }
                    Segment::Glob(glob) => {
                        let mut names = list_subdirectories(&dir);
                        names.retain(|name| glob.is_match(name));
                        names.sort_unstable();
                        next.extend(names.iter().map(|name| scope.child(name)));
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }
}

/// Lists the names of the sub-directories of `dir`.
///
/// A directory that vanished (or cannot be listed) has no sub-directories.
fn list_subdirectories(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::trace!("cannot list `{}`: {}", dir.display(), err);
            return Vec::new();
        }
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|ft| ft.is_dir()))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect()
}

/// The root scope and the patterns of its sub-scopes of interest.
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    root: ScopePath,
    patterns: Vec<Pattern>,
}

impl ScopeConfig {
    /// Compiles the given patterns. Blank patterns are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first [`PatternError`] encountered.
    pub fn new<I, S>(root: &str, patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter(|p| !p.as_ref().trim().is_empty())
            .map(|p| Pattern::new(p.as_ref().trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            root: ScopePath::new(root),
            patterns,
        })
    }

    pub fn root(&self) -> &ScopePath {
        &self.root
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Anchors the root in the given hierarchy and checks that it exists.
    ///
    /// A root given as a full filesystem path below the hierarchy mount point
    /// (e.g. `/sys/fs/cgroup/slurm`) is turned into the matching cgroup path (`/slurm`).
    /// The host path is accepted as well as its rootfs-prefixed form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RootNotFound`] if the root cgroup does not exist, or
    /// [`Error::RootCheck`] if its existence cannot be checked.
    pub fn anchored_in(mut self, hierarchy: &Hierarchy) -> Result<Self, Error> {
        let mount = hierarchy.enumeration_root();
        let root = Path::new(self.root.as_str());
        let relative = root
            .strip_prefix(mount)
            .or_else(|_| root.strip_prefix(hierarchy.host_enumeration_root()));
        if let Ok(relative) = relative {
            if let Some(relative) = relative.to_str() {
                self.root = ScopePath::new(relative);
            }
        }

        let path = self.root.dir_in(mount);
        match path.try_exists() {
            Ok(true) if path.is_dir() => Ok(self),
            Ok(_) => Err(Error::RootNotFound {
                scope: self.root,
                path,
            }),
            Err(source) => Err(Error::RootCheck { path, source }),
        }
    }

    /// Lists the root followed by every cgroup currently matching one of the patterns.
    ///
    /// Patterns are expanded in configuration order. A pattern with no match contributes
    /// nothing; this is logged but is not an error. A cgroup matched by several patterns
    /// is listed once.
    pub fn resolve(&self, hierarchy: &Hierarchy) -> Vec<ScopePath> {
        let mount = hierarchy.enumeration_root();
        let mut seen = HashSet::new();
        let mut scopes = vec![self.root.clone()];
        seen.insert(self.root.clone());
        for pattern in &self.patterns {
            let matches = pattern.expand(mount, &self.root);
            if matches.is_empty() {
                log::info!(
                    "no cgroup matches pattern `{}` under `{}`",
                    pattern.as_str(),
                    self.root
                );
            }
            scopes.extend(matches.into_iter().filter(|m| seen.insert(m.clone())));
        }
        scopes
    }
}
