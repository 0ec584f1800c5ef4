//! Backend version detection and feature gating.
//!
//! The backend's semantic version gates which options may be sent: older
//! backends reject or silently drop fields they do not know, so
//! incompatible options fail fast on the host side instead.

use std::sync::OnceLock;

use regex::Regex;
use semver::Version;

/// `http` settings require Pkl 0.26.
pub(crate) const FLOOR_HTTP: (u64, u64) = (0, 26);
/// External reader registrations require Pkl 0.27.
pub(crate) const FLOOR_EXTERNAL_READERS: (u64, u64) = (0, 27);
/// `output.bytes` and `output.files` byte access require Pkl 0.29.
pub(crate) const FLOOR_BYTES: (u64, u64) = (0, 29);
/// HTTP rewrite rules require Pkl 0.29.
pub(crate) const FLOOR_HTTP_REWRITES: (u64, u64) = (0, 29);
/// Trace mode selection requires Pkl 0.30.
pub(crate) const FLOOR_TRACE_MODE: (u64, u64) = (0, 30);

/// Whether `version` is at least `floor.0.floor.1.0`.
pub(crate) fn supports(version: &Version, floor: (u64, u64)) -> bool {
    *version >= Version::new(floor.0, floor.1, 0)
}

fn pkl_version_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // the semver core, with optional prerelease and build metadata
        Regex::new(
            r"Pkl (\d+\.\d+\.\d+(?:-[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?(?:\+[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?)",
        )
        .expect("version pattern is valid")
    })
}

/// Extracts the semver from `pkl --version` output, e.g.
/// `Pkl 0.28.1 (macOS 15.1, native)`.
pub(crate) fn parse_version_output(output: &str) -> Option<Version> {
    let captures = pkl_version_regex().captures(output)?;
    Version::parse(&captures[1]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_banners() {
        let version = parse_version_output("Pkl 0.28.1 (macOS 15.1, native)").unwrap();
        assert_eq!(version, Version::new(0, 28, 1));

        let version = parse_version_output("Pkl 0.30.0-dev+36d30c7 (Linux 6.8, Java 21)").unwrap();
        assert_eq!(version.major, 0);
        assert_eq!(version.minor, 30);
        assert_eq!(version.pre.as_str(), "dev");

        assert!(parse_version_output("pkl: command not found").is_none());
    }

    #[test]
    fn feature_floors() {
        let v0_25 = Version::new(0, 25, 3);
        let v0_26 = Version::new(0, 26, 0);
        let v0_30 = Version::new(0, 30, 1);

        assert!(!supports(&v0_25, FLOOR_HTTP));
        assert!(supports(&v0_26, FLOOR_HTTP));
        assert!(!supports(&v0_26, FLOOR_EXTERNAL_READERS));
        assert!(supports(&v0_30, FLOOR_TRACE_MODE));
        assert!(supports(&v0_30, FLOOR_HTTP_REWRITES));
        assert!(supports(&v0_30, FLOOR_BYTES));
    }

    #[test]
    fn prerelease_is_below_its_release() {
        let prerelease = Version::parse("0.26.0-rc.1").unwrap();
        assert!(!supports(&prerelease, FLOOR_HTTP));
    }
}
