use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod bus;

pub use bus::{BuildOrder, BuildResult, ProtocolError, QueueAddress, QueueNames};

// --- Platform ---

/// Target platform of a build: operating system + architecture.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlatformParseError {
    #[error("invalid platform format: {0}")]
    InvalidFormat(String),
    #[error("invalid OS format: {0}")]
    InvalidOs(String),
    #[error("invalid Architecture format: {0}")]
    InvalidArch(String),
}

impl Platform {
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.trim().to_string(),
            arch: arch.trim().to_string(),
        }
    }

    /// Menu label, e.g. `OS: linux, Architecture: x86_64`.
    pub fn label(&self) -> String {
        format!("OS: {}, Architecture: {}", self.os, self.arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = PlatformParseError;

    /// Accepts `os/arch` or the menu label form `OS: <os>, Architecture: <arch>`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.contains(',') {
            let parts: Vec<&str> = input.split(',').collect();
            if parts.len() != 2 {
                return Err(PlatformParseError::InvalidFormat(input.to_string()));
            }
            let os = parts[0]
                .trim()
                .strip_prefix("OS: ")
                .ok_or_else(|| PlatformParseError::InvalidOs(parts[0].trim().to_string()))?;
            let arch = parts[1]
                .trim()
                .strip_prefix("Architecture: ")
                .ok_or_else(|| PlatformParseError::InvalidArch(parts[1].trim().to_string()))?;
            if os.trim().is_empty() || arch.trim().is_empty() {
                return Err(PlatformParseError::InvalidFormat(input.to_string()));
            }
            return Ok(Platform::new(os, arch));
        }

        match input.split_once('/') {
            Some((os, arch)) if !os.trim().is_empty() && !arch.trim().is_empty() => {
                Ok(Platform::new(os, arch))
            }
            _ => Err(PlatformParseError::InvalidFormat(input.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_both_forms() {
        let p: Platform = "linux/x86_64".parse().unwrap();
        assert_eq!(p, Platform::new("linux", "x86_64"));

        let q: Platform = "OS: linux, Architecture: arm64\n".parse().unwrap();
        assert_eq!(q, Platform::new("linux", "arm64"));
        assert_eq!(q.label(), "OS: linux, Architecture: arm64");
        assert_eq!(q.to_string(), "linux/arm64");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "linux".parse::<Platform>(),
            Err(PlatformParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            "Linux: x, Architecture: y".parse::<Platform>(),
            Err(PlatformParseError::InvalidOs(_))
        ));
        assert!(matches!(
            "OS: linux, Arch: y".parse::<Platform>(),
            Err(PlatformParseError::InvalidArch(_))
        ));
        assert!("a, b, c".parse::<Platform>().is_err());
    }
}
