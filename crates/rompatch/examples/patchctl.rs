//! Small demo front-end exercising `identify` -> `parse` -> `apply` against
//! file paths, standing in for the externally-owned UI shell.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::Level;

use rompatch::dispatcher::{self, Options};

#[derive(Parser)]
#[command(name = "patchctl", about = "Apply or create ROM patch containers", version)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected format of a patch file
    Identify {
        /// Path to the patch file
        patch: PathBuf,
    },
    /// Apply a patch to a source file, writing the result to `output`
    Apply {
        /// Path to the patch file
        patch: PathBuf,
        /// Path to the source ROM
        source: PathBuf,
        /// Path to write the patched output
        output: PathBuf,
        /// Fail if the patch's source precondition check does not pass
        #[arg(long)]
        require_validation: bool,
        /// Strip a known console header before applying, reattach after
        #[arg(long)]
        remove_header: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(Level::from(cli.log_level))
        .init();

    match cli.command {
        Commands::Identify { patch } => {
            let bytes = std::fs::read(&patch).with_context(|| format!("reading {}", patch.display()))?;
            match dispatcher::identify(&bytes) {
                Some(tag) => println!("{}", tag.as_str()),
                None => bail!("no codec recognized {}", patch.display()),
            }
        }
        Commands::Apply {
            patch,
            source,
            output,
            require_validation,
            remove_header,
        } => {
            let patch_bytes = std::fs::read(&patch).with_context(|| format!("reading {}", patch.display()))?;
            let source_bytes = std::fs::read(&source).with_context(|| format!("reading {}", source.display()))?;

            let parsed = dispatcher::parse(&patch_bytes)?;
            let options = Options {
                require_validation,
                remove_header,
                ..Options::default()
            };
            let result = dispatcher::apply(&parsed, &source_bytes, &options)?;
            std::fs::write(&output, result).with_context(|| format!("writing {}", output.display()))?;
        }
    }

    Ok(())
}
