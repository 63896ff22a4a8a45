//! Generic parsing of cgroup stat files into structured types.
//!
//! - [`KeyValueStat`]: multi-line `key value` files such as `cpu.stat`, `cpuacct.stat` and
//!   `memory.stat`. Only registered keys are parsed; unknown keys are skipped, and a
//!   registered key appearing twice is an error.
//! - [`SingleLineStat`]: files holding one value, such as `cpuacct.usage`.
//!
//! # Example: Implementing `KeyValueStat`
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::LazyLock;
//! use cgroup_exporter::cgroup::stats::KeyValueStat;
//!
//! #[derive(Default)]
//! struct MyStat {
//!     foo: u64,
//! }
//!
//! static HANDLERS: LazyLock<HashMap<&'static str, fn(&mut MyStat, u64)>> =
//!     LazyLock::new(|| HashMap::from([("foo", (|s: &mut MyStat, v: u64| s.foo = v) as fn(&mut MyStat, u64))]));
//!
//! impl KeyValueStat for MyStat {
//!     fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
//!         &HANDLERS
//!     }
//! }
//!
//! let stat = MyStat::from_reader(&mut "foo 7\nbar 9\n".as_bytes()).unwrap();
//! assert_eq!(stat.foo, 7);
//! ```

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use super::StatParseError;

/// A trait for parsing `key value` formatted stat files.
///
/// Implementors register the keys they care about and a setter for each.
pub trait KeyValueStat: Default
where
    Self: 'static,
{
    /// Returns the known field names and the handler applying a parsed value to `Self`.
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)>;

    /// Parses a `key value` buffer line by line.
    ///
    /// Parsing stops early once every registered key has been seen.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if reading fails, or a [`StatParseError`] wrapped in an
    /// `io::Error` if a registered value is not an unsigned integer or is repeated.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut stat = Self::default();
        let handlers = Self::field_handlers();
        let mut seen_keys = HashSet::with_capacity(handlers.len());

        let mut line = String::new();
        let mut lineno = 0;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            let mut parts = line.split_whitespace();
            if let (Some(key), Some(val)) = (parts.next(), parts.next()) {
                if let Some((k, handler)) = handlers.get_key_value(key) {
                    let parsed =
                        val.parse::<u64>()
                            .map_err(|source| StatParseError::InvalidKeyValue {
                                key: key.to_string(),
                                value: val.to_string(),
                                line: lineno,
                                source,
                            })?;
                    if !seen_keys.insert(*k) {
                        return Err(StatParseError::DuplicateField {
                            field: key.to_string(),
                            line: lineno,
                        }
                        .into());
                    }
                    handler(&mut stat, parsed);
                }
            }
            if seen_keys.len() == handlers.len() {
                break;
            }

            line.clear();
        }

        Ok(stat)
    }
}

/// A trait for parsing single-line, single-value statistics.
pub trait SingleLineStat: Sized {
    /// Parses the statistic from the provided buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if reading or parsing fails.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self>;
}

/// Reads the first line of `buf` as an unsigned integer.
pub(super) fn read_single_u64<R: BufRead>(buf: &mut R) -> std::io::Result<u64> {
    let mut line = String::new();
    buf.read_line(&mut line)?;
    let line = line.trim();
    line.parse::<u64>().map_err(|source| {
        StatParseError::InvalidValue {
            value: line.to_string(),
            line: 1,
            source,
        }
        .into()
    })
}
