//! `build` and `ls-files`.

use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use colored::Colorize;
use prost::Message;

use protoimage_build::{print_annotations, resolve_file_set, ErrorFormat};

use crate::input::Input;
use crate::InputArgs;

pub struct BuildOptions {
    pub output: Option<String>,
    pub as_file_descriptor_set: bool,
    pub include_imports: bool,
    pub include_source_info: bool,
    pub error_format: ErrorFormat,
}

/// Run a build. Returns `false` when annotations were reported, in which
/// case nothing is written.
pub fn cmd_build(args: &InputArgs, options: &BuildOptions) -> Result<bool> {
    let input = Input::open(args)?;
    let result = protoimage_build::build(
        &input.bucket,
        &input.options,
        options.include_imports,
        options.include_source_info,
    )?;
    input.close()?;

    if !result.annotations.is_empty() {
        let stderr = io::stderr();
        let mut err = stderr.lock();
        print_annotations(&mut err, &result.annotations, options.error_format)
            .context("failed to write annotations")?;
        return Ok(false);
    }

    let Some(output) = &options.output else {
        return Ok(true);
    };
    let bytes = if options.as_file_descriptor_set {
        result.image.to_descriptor_set().encode_to_vec()
    } else {
        result.image.encode_to_vec()
    };
    if output == "-" {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(&bytes).context("failed to write to stdout")?;
        out.flush()?;
    } else {
        fs::write(output, &bytes).with_context(|| format!("failed to write {output}"))?;
        eprintln!(
            "{} {} ({} files)",
            "wrote".green().bold(),
            output.bold(),
            result.image.len()
        );
    }
    Ok(true)
}

pub fn cmd_ls_files(args: &InputArgs) -> Result<()> {
    let input = Input::open(args)?;
    let file_set = resolve_file_set(&input.bucket, &input.options)?;
    input.close()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for file in file_set.files() {
        writeln!(out, "{}", file.name)?;
    }
    Ok(())
}
