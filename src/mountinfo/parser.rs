//! Mountinfo line parser for Linux systems.
//!
//! Parses lines in `/proc/[pid]/mountinfo` format. See
//! [`proc_pid_mountinfo(5)`](https://man7.org/linux/man-pages/man5/proc_pid_mountinfo.5.html)
//! for details on the structure.

use std::borrow::Cow;

/// Represents a parsed mountinfo line.
///
/// Only the fields needed to locate cgroup hierarchies are kept.
#[derive(Debug, PartialEq, Eq)]
pub struct MountInfo<'a> {
    /// Root of the mount within the filesystem.
    pub root: &'a str,
    /// Mount point relative to the process's root, with octal escapes (`\040`) decoded.
    pub mount_point: Cow<'a, str>,
    /// Filesystem type (e.g., `cgroup`, `cgroup2`).
    pub fs_type: &'a str,
    /// Superblock options. For cgroup v1 these name the attached controllers.
    pub super_options: &'a str,
}

impl MountInfo<'_> {
    /// Iterates over the comma-separated superblock options.
    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.super_options.split(',').filter(|o| !o.is_empty())
    }

    /// Returns `true` if `option` is one of the superblock options.
    pub fn has_option(&self, option: &str) -> bool {
        self.options().any(|o| o == option)
    }
}

/// Named fields in a mountinfo line.
#[derive(Debug)]
pub enum MountInfoField {
    Root,
    MountPoint,
    FsType,
    Source,
    SuperOptions,
}

impl std::fmt::Display for MountInfoField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MountInfoField::Root => "root",
            MountInfoField::MountPoint => "mount_point",
            MountInfoField::FsType => "fs_type",
            MountInfoField::Source => "source",
            MountInfoField::SuperOptions => "super_options",
        };
        write!(f, "{name}")
    }
}

/// Errors that may occur when parsing a mountinfo line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing separator ` - ` in line: `{0}`")]
    MissingSeparator(String),

    #[error("missing `{field}` in line: `{line}`")]
    MissingField { field: MountInfoField, line: String },
}

/// Parses a single line of mountinfo data.
///
/// The pre-separator section is `mount_id parent_id major:minor root mount_point options
/// [optional fields...]`; the post-separator section is `fs_type source super_options`.
///
/// # Errors
///
/// Returns [`ParseError`] variants for a missing separator or missing required fields.
pub fn parse_mount_info_line(line: &str) -> Result<MountInfo<'_>, ParseError> {
    let (pre, post) = line
        .split_once(" - ")
        .ok_or_else(|| ParseError::MissingSeparator(line.to_owned()))?;

    let missing = |field| ParseError::MissingField {
        field,
        line: line.to_owned(),
    };

    // mount id, parent id and major:minor are not needed
    let mut pre_fields = pre.split_whitespace().skip(3);
    let root = pre_fields.next().ok_or_else(|| missing(MountInfoField::Root))?;
    let mount_point = pre_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::MountPoint))?;

    let mut post_fields = post.split_whitespace();
    let fs_type = post_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::FsType))?;
    post_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::Source))?;
    let super_options = post_fields
        .next()
        .ok_or_else(|| missing(MountInfoField::SuperOptions))?;

    Ok(MountInfo {
        root,
        mount_point: unescape(mount_point),
        fs_type,
        super_options,
    })
}

/// Decodes the `\ooo` octal escapes the kernel uses for space, tab, newline and backslash.
fn unescape(field: &str) -> Cow<'_, str> {
    if !field.contains('\\') {
        return Cow::Borrowed(field);
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let code = bytes[i + 1..i + 4]
                .iter()
                .fold(0u8, |acc, b| acc.wrapping_mul(8).wrapping_add(b - b'0'));
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|b| (b'0'..=b'7').contains(b))
}
