//! protoimage CLI
//!
//! - `protoimage build`: compile a directory of `.proto` files into an Image
//!   (or a `FileDescriptorSet`)
//! - `protoimage ls-files`: list the files a build would compile

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use protoimage_build::ErrorFormat;

mod build;
mod input;

/// Exit status for a build that produced annotations.
pub const ANNOTATIONS_EXIT_CODE: i32 = 100;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "PROTOIMAGE_LOG";

#[derive(Parser)]
#[command(name = "protoimage")]
#[command(author, version, about = "Build protobuf Images from .proto sources")]
struct Cli {
    /// Log at debug level (overridden by PROTOIMAGE_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Directory containing the sources.
    #[arg(default_value = ".")]
    pub input: PathBuf,

    /// Config file path or inline YAML. Defaults to `protoimage.yaml` in the
    /// input directory when present.
    #[arg(long)]
    pub config: Option<String>,

    /// Limit the build to these files or directories (relative to the input).
    #[arg(long = "path")]
    pub paths: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the input into an Image.
    ///
    /// Annotations are printed to stderr and the process exits with status
    /// 100 when there are any.
    Build {
        #[command(flatten)]
        input: InputArgs,

        /// Output file, `-` for stdout. Nothing is written when omitted.
        #[arg(short, long)]
        output: Option<String>,

        /// Write a google.protobuf.FileDescriptorSet instead of an Image.
        #[arg(long)]
        as_file_descriptor_set: bool,

        /// Leave imported files out of the output.
        #[arg(long)]
        exclude_imports: bool,

        /// Leave source code info (spans and comments) out of the output.
        #[arg(long)]
        exclude_source_info: bool,

        /// Annotation format: text or json.
        #[arg(long, default_value_t = ErrorFormat::Text)]
        error_format: ErrorFormat,
    },

    /// Print the root-relative path of every file in the file set.
    LsFiles {
        #[command(flatten)]
        input: InputArgs,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            input,
            output,
            as_file_descriptor_set,
            exclude_imports,
            exclude_source_info,
            error_format,
        } => {
            let options = build::BuildOptions {
                output,
                as_file_descriptor_set,
                include_imports: !exclude_imports,
                include_source_info: !exclude_source_info,
                error_format,
            };
            let clean = build::cmd_build(&input, &options)?;
            if !clean {
                std::process::exit(ANNOTATIONS_EXIT_CODE);
            }
        }
        Commands::LsFiles { input } => build::cmd_ls_files(&input)?,
    }
    Ok(())
}
