//! Turning command-line input arguments into a bucket and file-set options.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use protoimage_build::{BuildConfig, FileSetOptions};
use protoimage_storage::{DirBucket, ReadBucket};

use crate::InputArgs;

pub struct Input {
    pub bucket: DirBucket,
    pub options: FileSetOptions,
}

impl Input {
    pub fn open(args: &InputArgs) -> Result<Self> {
        let bucket = DirBucket::new(&args.input)
            .with_context(|| format!("failed to open input {}", args.input.display()))?;
        let config = load_config(&bucket, args.config.as_deref())?;
        tracing::debug!(
            input = %args.input.display(),
            roots = ?config.build.roots,
            excludes = ?config.build.excludes,
            "resolved build config"
        );
        let options = FileSetOptions::from_config(&config).with_paths(args.paths.clone());
        Ok(Self { bucket, options })
    }

    pub fn close(self) -> Result<()> {
        self.bucket.close().context("failed to close input")
    }
}

/// `--config` is a file path when such a file exists, inline YAML otherwise.
/// Without it, `protoimage.yaml` in the input directory is used if present.
fn load_config(bucket: &DirBucket, config: Option<&str>) -> Result<BuildConfig> {
    let Some(config) = config else {
        return BuildConfig::from_bucket(bucket).context("failed to load protoimage.yaml");
    };
    if Path::new(config).is_file() {
        let text =
            fs::read_to_string(config).with_context(|| format!("failed to read config {config}"))?;
        return BuildConfig::from_yaml(&text).with_context(|| format!("invalid config {config}"));
    }
    BuildConfig::from_yaml(config).context("invalid inline config")
}
