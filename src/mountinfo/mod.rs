//! Discovery of cgroup filesystems from `/proc/<pid>/mountinfo`.
mod cgroups;
mod error;
mod parser;

pub use cgroups::{CgroupMount, CgroupVersion, read_cgroup_mounts};
pub use error::{Error, Result};
pub use parser::{MountInfo, MountInfoField, ParseError, parse_mount_info_line};
