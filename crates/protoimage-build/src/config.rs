//! Build configuration (`protoimage.yaml`).
//!
//! ```yaml
//! version: v1
//! build:
//!   roots:
//!     - proto
//!     - third_party
//!   excludes:
//!     - proto/internal
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use protoimage_storage::{BucketError, ReadBucket};

/// Name of the config file looked up at the input root.
pub const CONFIG_FILE_NAME: &str = "protoimage.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported config version {0:?}")]
    UnsupportedVersion(String),

    #[error(transparent)]
    Bucket(#[from] BucketError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub build: BuildSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            excludes: Vec::new(),
        }
    }
}

fn default_roots() -> Vec<String> {
    vec![".".to_string()]
}

impl BuildConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        // An empty document is a valid, default config.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: BuildConfig = serde_yaml::from_str(text)?;
        if let Some(version) = &config.version {
            if version != "v1" {
                return Err(ConfigError::UnsupportedVersion(version.clone()));
            }
        }
        if config.build.roots.is_empty() {
            config.build.roots = default_roots();
        }
        Ok(config)
    }

    /// Read `protoimage.yaml` from the bucket root, or return the defaults when
    /// there is none.
    pub fn from_bucket(bucket: &dyn ReadBucket) -> Result<Self, ConfigError> {
        match bucket.get(CONFIG_FILE_NAME) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                tracing::debug!(file = CONFIG_FILE_NAME, "loaded build config from input");
                Self::from_yaml(&text)
            }
            Err(err) if err.is_not_found() => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protoimage_storage::MemoryBucket;

    #[test]
    fn parses_roots_and_excludes() {
        let config = BuildConfig::from_yaml(
            "version: v1\nbuild:\n  roots: [proto, vendor]\n  excludes: [proto/tmp]\n",
        )
        .unwrap();
        assert_eq!(config.build.roots, vec!["proto", "vendor"]);
        assert_eq!(config.build.excludes, vec!["proto/tmp"]);
    }

    #[test]
    fn defaults_to_single_dot_root() {
        assert_eq!(BuildConfig::from_yaml("").unwrap().build.roots, vec!["."]);
        assert_eq!(BuildConfig::from_yaml("version: v1").unwrap().build.roots, vec!["."]);
        assert_eq!(
            BuildConfig::from_yaml("build:\n  excludes: [x]").unwrap().build.roots,
            vec!["."]
        );
    }

    #[test]
    fn rejects_unknown_keys_and_versions() {
        assert!(matches!(
            BuildConfig::from_yaml("build:\n  rots: [a]"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            BuildConfig::from_yaml("version: v9"),
            Err(ConfigError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn loads_from_bucket_when_present() {
        let bucket = MemoryBucket::from_files([(CONFIG_FILE_NAME, "build:\n  roots: [proto]\n")]).unwrap();
        assert_eq!(BuildConfig::from_bucket(&bucket).unwrap().build.roots, vec!["proto"]);
        let empty = MemoryBucket::new();
        assert_eq!(BuildConfig::from_bucket(&empty).unwrap(), BuildConfig::default());
    }
}
