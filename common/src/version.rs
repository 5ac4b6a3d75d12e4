use std::fmt;
use std::str::FromStr;

/// Semantic version carried by every uploadable artifact.
///
/// Two versions are compatible when major and minor match; patch is a
/// free upgrade and never gates an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version string {0:?}, expected MAJOR.MINOR.PATCH")]
pub struct VersionParseError(pub String);

impl Version {
    pub fn compatible_with(self, other: Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|part| part.parse::<u16>().ok())
                .ok_or_else(|| VersionParseError(s.to_string()))
        };

        let version = Version {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };

        if parts.next().is_some() {
            return Err(VersionParseError(s.to_string()));
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
