//! Topology format versioning.
//!
//! Every serialized topology carries the version of the library that wrote
//! it. A topology may be loaded only if it was not written by a newer
//! library: both versions are split on `.`, the persisted one may not have
//! more components, and no persisted component may exceed the running
//! component in the same position. A component is compared by its leading
//! digits, so pre-release suffixes such as `-beta` are ignored.

use crate::error::{Result, RingError};

/// Version stamped on every topology this library writes.
pub const VERSION: &str = "2.1.0";

/// Checks `persisted` against [`VERSION`].
pub fn check_version(persisted: &str) -> Result<()> {
    check_compatible(persisted, VERSION)
}

/// Checks that a topology written at `persisted` can be read by `running`.
pub fn check_compatible(persisted: &str, running: &str) -> Result<()> {
    let incompatible = || RingError::VersionIncompatible {
        found: persisted.to_string(),
        supported: running.to_string(),
    };

    let persisted_parts = parse_components(persisted)?;
    let running_parts = parse_components(running)?;

    if persisted_parts.len() > running_parts.len() {
        return Err(incompatible());
    }

    // Missing trailing persisted components are fine.
    for (p, r) in persisted_parts.iter().zip(&running_parts) {
        if p > r {
            return Err(incompatible());
        }
    }
    Ok(())
}

/// Numeric value of each component. Only the leading digits of a component
/// count, so `0-beta` and `0rc1` both read as 0.
fn parse_components(version: &str) -> Result<Vec<u64>> {
    version
        .split('.')
        .map(|part| {
            let part = part.trim();
            let end = part
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(part.len());
            part[..end].parse::<u64>().map_err(|_| {
                RingError::Format(format!("version {:?} is not dot-separated numbers", version))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn same_version_is_compatible() {
        assert!(check_version(VERSION).is_ok());
    }

    #[test]
    fn older_and_shorter_versions_are_compatible() {
        assert!(check_compatible("2.0.0", "2.1.0").is_ok());
        assert!(check_compatible("1.0.0", "2.1.0").is_ok());
        assert!(check_compatible("2", "2.1.0").is_ok());
        assert!(check_compatible("2.1", "2.1.0").is_ok());
    }

    #[test]
    fn newer_versions_are_rejected() {
        for v in ["3.0.0", "2.2.0", "2.1.1", "2.1.0.1"] {
            let err = check_compatible(v, "2.1.0").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::VersionIncompatible, "{}", v);
        }
    }

    #[test]
    fn comparison_is_per_component() {
        // Each component is checked on its own, not lexicographically.
        assert!(check_compatible("1.5.0", "2.1.0").is_err());
    }

    #[test]
    fn non_numeric_version_is_format_error() {
        let err = check_compatible("2.x.0", "2.1.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(check_compatible("", "2.1.0").is_err());
        assert!(check_compatible("2.-1.0", "2.1.0").is_err());
    }

    #[test]
    fn suffixed_components_compare_by_leading_digits() {
        assert!(check_compatible("2.1.0-beta", "2.1.0").is_ok());
        assert!(check_compatible("2.0.0-rc1", "2.1.0").is_ok());
        assert!(check_compatible("2.1.0", "2.1.0-dev").is_ok());

        let err = check_compatible("2.2.0-beta", "2.1.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionIncompatible);
    }
}
